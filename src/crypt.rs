//! Header transform interface.
//!
//! Game clients obfuscate packet headers with a rolling, stream-cipher-like
//! transform; payloads travel in the clear. The transform keeps separate
//! rolling state per direction, so a [`HeaderCrypt`] is split into an
//! encrypt half (owned by the output path) and a decrypt half (owned by the
//! input path). Each half is called exactly once per header, in wire order.

use crate::error::Result;

/// Outbound half of a header transform.
pub trait HeaderEncrypt: Send + 'static {
    /// Encrypt one header in place and advance the rolling state.
    fn encrypt_header(&mut self, header: &mut [u8]);
}

/// Inbound half of a header transform.
pub trait HeaderDecrypt: Send + 'static {
    /// Decrypt one header in place and advance the rolling state.
    ///
    /// An error is treated as a protocol violation and closes the connection.
    fn decrypt_header(&mut self, header: &mut [u8]) -> Result<()>;
}

/// A per-connection header transform that can be split by direction.
pub trait HeaderCrypt {
    type Encrypt: HeaderEncrypt;
    type Decrypt: HeaderDecrypt;

    /// Separate the transform into its two directions.
    fn split(self) -> (Self::Encrypt, Self::Decrypt);
}

/// Identity transform, used before authentication completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlainCrypt;

impl HeaderEncrypt for PlainCrypt {
    #[inline]
    fn encrypt_header(&mut self, _header: &mut [u8]) {}
}

impl HeaderDecrypt for PlainCrypt {
    #[inline]
    fn decrypt_header(&mut self, _header: &mut [u8]) -> Result<()> {
        Ok(())
    }
}

impl HeaderCrypt for PlainCrypt {
    type Encrypt = PlainCrypt;
    type Decrypt = PlainCrypt;

    fn split(self) -> (PlainCrypt, PlainCrypt) {
        (PlainCrypt, PlainCrypt)
    }
}
