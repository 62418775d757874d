//! The message codec plug-in interface. The core only ever sees opaque
//! blobs; header framing, compression, encryption, and checksums are
//! entirely the codec's concern.

use crate::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("codec failed to deserialize a mailbox blob")]
pub struct CodecError;

/// A pluggable message codec. `serialize` must round-trip through
/// `deserialize`; the sender/receiver pids are made available so a codec can
/// fold them into a wire header, but a codec is free to ignore them.
pub trait Codec: Send + Sync {
    fn serialize(&self, bytes: &[u8], sender: Pid, receiver: Pid) -> Vec<u8>;
    fn deserialize(&self, blob: Vec<u8>) -> Result<Vec<u8>, CodecError>;
}

/// The trivial codec used when no codec is configured: copy in, copy out.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn serialize(&self, bytes: &[u8], _sender: Pid, _receiver: Pid) -> Vec<u8> {
        bytes.to_vec()
    }

    fn deserialize(&self, blob: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_codec_round_trips() {
        let codec = IdentityCodec;
        let sender = Pid::new(1000);
        let receiver = Pid::new(1001);
        let blob = codec.serialize(b"hello", sender, receiver);
        assert_eq!(codec.deserialize(blob).unwrap(), b"hello");
    }
}
