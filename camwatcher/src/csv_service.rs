//! Wire endpoint letting the out-of-process analytics subscriber enqueue
//! [`CsvRecord`]s onto the in-process [`crate::csv_writer`] thread. The
//! ingest dispatcher, running in the same process as the writer, enqueues
//! directly and never goes through this socket.

use sentinelcam_wire::reqrep::serve;
use tokio::net::TcpListener;

use crate::csv_writer::CsvRecord;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Ack;

pub async fn run(listener: TcpListener, csv_tx: channellib::Sender<CsvRecord>) -> anyhow::Result<()> {
    serve(listener, move |record: CsvRecord| {
        let csv_tx = csv_tx.clone();
        async move {
            match csv_tx.send(record) {
                Ok(()) => Ack,
                Err(_) => {
                    tracing::warn!("csv writer thread has shut down, dropping record");
                    Ack
                }
            }
        }
    })
    .await?;
    Ok(())
}
