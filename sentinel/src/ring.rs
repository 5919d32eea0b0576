//! Shared-memory ring buffer: a fixed number of pre-allocated frame slots of
//! `width * height * 3` bytes, written by the job manager and read by a
//! task-engine subprocess. The `count`/`start`/`end` bookkeeping lives only
//! on the job-manager (producer) side — the wire protocol in [`crate::wire`]
//! is the sole means by which the consumer learns which slot to read, so no
//! synchronization primitive is needed over the shared memory itself.

use shared_memory::{Shmem, ShmemConf, ShmemError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RingError {
    #[error("shared memory error: {0}")]
    Shmem(#[from] ShmemError),
    #[error("ring buffer is full")]
    Full,
    #[error("no ring buffer model supports camsize {0}x{1}")]
    UnsupportedSize(u32, u32),
}

/// One `{name -> (W,H,L)}` entry of a declarative ring-buffer model.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RingModel {
    #[serde(default)]
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub length: usize,
}

impl RingModel {
    pub fn slot_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn matches_camsize(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

fn shmem_os_id(engine: &str, model_name: &str) -> String {
    format!("sentinelcam-ring-{engine}-{model_name}")
}

/// Producer-side handle, owned exclusively by the job manager for the
/// lifetime of one engine's ring buffer.
pub struct RingBuffer {
    shmem: Shmem,
    model: RingModel,
    count: usize,
    start: usize,
    end: usize,
}

impl RingBuffer {
    /// Allocate (or re-attach to, if already present from a prior run) the
    /// named shared-memory region sized for `model`.
    pub fn create(engine: &str, model: RingModel) -> Result<Self, RingError> {
        let os_id = shmem_os_id(engine, &model.name);
        let size = model.length * model.slot_bytes();
        let shmem = match ShmemConf::new().os_id(&os_id).size(size).create() {
            Ok(shmem) => shmem,
            Err(ShmemError::MappingIdExists) => ShmemConf::new().os_id(&os_id).open()?,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            shmem,
            model,
            count: 0,
            start: 0,
            end: 0,
        })
    }

    pub fn model(&self) -> &RingModel {
        &self.model
    }

    pub fn shmem_name(&self) -> &str {
        self.shmem.get_os_id()
    }

    pub fn is_full(&self) -> bool {
        self.count == self.model.length
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Copy `frame` into slot `end`, advance `end`, increment `count`.
    /// Returns the slot index the caller should report over the wire.
    pub fn put(&mut self, frame: &[u8]) -> Result<usize, RingError> {
        if self.is_full() {
            return Err(RingError::Full);
        }
        let idx = self.end;
        let slot_bytes = self.model.slot_bytes();
        debug_assert!(frame.len() <= slot_bytes);
        // SAFETY: slot `idx` is not `start` while `count > 0` is violated
        // only if the consumer hasn't acknowledged `frame_complete` for a
        // slot we are about to overwrite; `is_full` above rules that out.
        unsafe {
            let base = self.shmem.as_ptr().add(idx * slot_bytes);
            std::ptr::copy_nonoverlapping(frame.as_ptr(), base, frame.len());
        }
        self.end = (self.end + 1) % self.model.length;
        self.count += 1;
        Ok(idx)
    }

    /// Consumer-side acknowledgment: advance `start`, decrement `count`.
    pub fn frame_complete(&mut self) {
        if self.count > 0 {
            self.start = (self.start + 1) % self.model.length;
            self.count -= 1;
        }
    }

    /// The slot the next `get` would hand out, or `None` if empty.
    pub fn peek_start(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.start)
        }
    }
}

/// Consumer-side handle: a task engine re-attaches to the producer's
/// shared-memory region by name and reads whatever slot index the ring wire
/// hands back.
pub struct RingBufferReader {
    shmem: Shmem,
    slot_bytes: usize,
}

impl RingBufferReader {
    pub fn open(shmem_name: &str, slot_bytes: usize) -> Result<Self, RingError> {
        let shmem = ShmemConf::new().os_id(shmem_name).open()?;
        Ok(Self { shmem, slot_bytes })
    }

    /// Borrow the bytes of slot `idx`. Valid only between the `Bucket(idx)`
    /// reply and the engine's next `Next` request.
    pub fn read_slot(&self, idx: usize) -> &[u8] {
        // SAFETY: the ring-wire protocol guarantees the producer will not
        // write slot `idx` again until this engine acknowledges it via the
        // next `Next` request.
        unsafe {
            let base = self.shmem.as_ptr().add(idx * self.slot_bytes);
            std::slice::from_raw_parts(base, self.slot_bytes)
        }
    }
}

/// Pick the first model in `models` whose dimensions match `(width, height)`.
pub fn select_model(models: &[RingModel], width: u32, height: u32) -> Result<RingModel, RingError> {
    models
        .iter()
        .find(|m| m.matches_camsize(width, height))
        .cloned()
        .ok_or(RingError::UnsupportedSize(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model(name: &str) -> RingModel {
        RingModel {
            name: name.to_string(),
            width: 4,
            height: 2,
            length: 3,
        }
    }

    #[test]
    fn put_get_frame_complete_cycle() {
        let model = test_model("putget");
        let slot_bytes = model.slot_bytes();
        let mut ring = RingBuffer::create("test-engine-a", model).unwrap();
        assert!(ring.is_empty());

        let frame = vec![7u8; slot_bytes];
        let idx0 = ring.put(&frame).unwrap();
        assert_eq!(idx0, 0);
        assert_eq!(ring.count(), 1);

        let reader = RingBufferReader::open(ring.shmem_name(), slot_bytes).unwrap();
        assert_eq!(reader.read_slot(idx0), frame.as_slice());

        ring.frame_complete();
        assert!(ring.is_empty());
    }

    #[test]
    fn put_fails_when_full() {
        let model = test_model("full");
        let slot_bytes = model.slot_bytes();
        let mut ring = RingBuffer::create("test-engine-b", model).unwrap();
        let frame = vec![0u8; slot_bytes];
        for _ in 0..3 {
            ring.put(&frame).unwrap();
        }
        assert!(ring.is_full());
        assert!(matches!(ring.put(&frame), Err(RingError::Full)));
    }

    #[test]
    fn select_model_rejects_unsupported_camsize() {
        let models = vec![test_model("only")];
        assert!(select_model(&models, 4, 2).is_ok());
        assert!(matches!(
            select_model(&models, 999, 999),
            Err(RingError::UnsupportedSize(999, 999))
        ));
    }
}
