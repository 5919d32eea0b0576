//! ASCII `command|json-payload` line protocol used by the ingest
//! dispatcher's control socket (`CameraUp|{...}`).

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::WireError;

/// Read one `command|json` line from `stream`, returning the command token
/// and the raw JSON payload string.
pub async fn read_command_line(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> Result<(String, String), WireError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(WireError::ConnectionClosed);
    }
    let line = line.trim_end_matches(['\r', '\n']);
    match line.split_once('|') {
        Some((cmd, payload)) => Ok((cmd.to_string(), payload.to_string())),
        None => Err(WireError::MalformedCommand(line.to_string())),
    }
}

pub async fn write_reply(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    reply: &str,
) -> Result<(), WireError> {
    writer.write_all(reply.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Send one `command|json` line and read back a single-line reply
/// (`OK`/`Error`). Used by callers registering a new outpost at runtime.
pub async fn send_command(
    stream: &mut TcpStream,
    command: &str,
    json_payload: &str,
) -> Result<String, WireError> {
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"|").await?;
    stream.write_all(json_payload.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;

    let (read_half, _write_half) = stream.split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn command_line_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut writer = write_half;
            let (cmd, payload) = read_command_line(&mut reader).await.unwrap();
            assert_eq!(cmd, "CameraUp");
            assert_eq!(payload, r#"{"node":"n1"}"#);
            write_reply(&mut writer, "OK").await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let reply = send_command(&mut client, "CameraUp", r#"{"node":"n1"}"#)
            .await
            .unwrap();
        assert_eq!(reply, "OK");
    }
}
