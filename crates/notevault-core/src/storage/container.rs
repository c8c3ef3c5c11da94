//! Page-encrypted container format.
//!
//! ```text
//! header:
//!   magic          8   b"NOTEVLT\0"
//!   format_version 2   u16 LE
//!   page_size      4   u32 LE
//!   page_count     4   u32 LE
//!   vault_id       16  UUID bytes
//!   key_check      40  AEAD(nonce | tag) over an empty message, aad = preceding header bytes
//! pages (page_count times):
//!   nonce | ciphertext(page_size) | tag,  aad = vault_id | page index | page count
//! ```
//!
//! The plaintext stream spread across pages is `u64 LE payload length`,
//! the payload, then zero padding up to a page boundary.
//!
//! The key check authenticates the header, so a wrong key or an edited
//! header fails before any page is touched. Every page is authenticated
//! before the payload is handed back; the caller never sees a partially
//! decrypted image.

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::aead::{self, SEAL_OVERHEAD};
use crate::crypto::EncryptionKey;
use crate::error::{Result, VaultError};

/// File magic.
pub const MAGIC: [u8; 8] = *b"NOTEVLT\0";

/// Current container format version.
pub const FORMAT_VERSION: u16 = 1;

/// Default plaintext page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 64 * 1024;

const HEADER_PREFIX_LEN: usize = 8 + 2 + 4 + 4 + 16;
const HEADER_LEN: usize = HEADER_PREFIX_LEN + SEAL_OVERHEAD;
const LENGTH_PREFIX: usize = 8;

/// Decoded container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub format_version: u16,
    pub page_size: u32,
    pub page_count: u32,
    pub vault_id: Uuid,
}

/// Check that a page size is usable.
pub fn validate_page_size(page_size: u32) -> Result<()> {
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) || !page_size.is_power_of_two() {
        return Err(VaultError::InvalidInput(format!(
            "Page size must be a power of two between {} and {} (got {})",
            MIN_PAGE_SIZE, MAX_PAGE_SIZE, page_size
        )));
    }
    Ok(())
}

/// Encrypt `payload` into a complete container image.
pub fn seal_image(
    key: &EncryptionKey,
    vault_id: Uuid,
    page_size: u32,
    payload: &[u8],
) -> Result<Vec<u8>> {
    validate_page_size(page_size)?;
    let page_len = page_size as usize;

    let stream_len = LENGTH_PREFIX + payload.len();
    let page_count = stream_len.div_ceil(page_len).max(1);
    let page_count_u32: u32 = page_count
        .try_into()
        .map_err(|_| VaultError::Storage("Vault image too large".to_string()))?;

    let mut stream = Zeroizing::new(vec![0u8; page_count * page_len]);
    stream[..LENGTH_PREFIX].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    stream[LENGTH_PREFIX..stream_len].copy_from_slice(payload);

    let header = ContainerHeader {
        format_version: FORMAT_VERSION,
        page_size,
        page_count: page_count_u32,
        vault_id,
    };
    let prefix = encode_header_prefix(&header);
    let key_check = aead::seal(key, &[], &prefix)?;

    let mut image = Vec::with_capacity(HEADER_LEN + page_count * (page_len + SEAL_OVERHEAD));
    image.extend_from_slice(&prefix);
    image.extend_from_slice(&key_check);

    for (index, page) in stream.chunks(page_len).enumerate() {
        let aad = page_aad(&header, index as u32);
        image.extend_from_slice(&aead::seal(key, page, &aad)?);
    }

    Ok(image)
}

/// Authenticate and decrypt a container image, returning its payload.
///
/// Any mismatch (magic, key, header fields, page contents, length) is a
/// `DecryptionFailure`. Only an authenticated header with a format version
/// this build does not know is reported as `Open`.
pub fn open_image(
    key: &EncryptionKey,
    image: &[u8],
) -> Result<(ContainerHeader, Zeroizing<Vec<u8>>)> {
    let header = read_header(image)?;
    aead::open(key, &image[HEADER_PREFIX_LEN..HEADER_LEN], &image[..HEADER_PREFIX_LEN])?;

    if header.format_version != FORMAT_VERSION {
        return Err(VaultError::Open(format!(
            "Unsupported vault format version {}",
            header.format_version
        )));
    }
    if validate_page_size(header.page_size).is_err() || header.page_count == 0 {
        return Err(VaultError::DecryptionFailure);
    }

    let page_len = header.page_size as usize;
    let sealed_page_len = page_len + SEAL_OVERHEAD;
    let page_count = header.page_count as usize;
    let expected_len = page_count
        .checked_mul(sealed_page_len)
        .and_then(|pages| pages.checked_add(HEADER_LEN))
        .ok_or(VaultError::DecryptionFailure)?;
    if image.len() != expected_len {
        return Err(VaultError::DecryptionFailure);
    }

    let mut stream = Zeroizing::new(Vec::with_capacity(page_count * page_len));
    for (index, sealed) in image[HEADER_LEN..].chunks(sealed_page_len).enumerate() {
        let aad = page_aad(&header, index as u32);
        let page = aead::open(key, sealed, &aad)?;
        stream.extend_from_slice(&page);
    }

    let mut length_bytes = [0u8; LENGTH_PREFIX];
    length_bytes.copy_from_slice(&stream[..LENGTH_PREFIX]);
    let payload_len =
        usize::try_from(u64::from_le_bytes(length_bytes)).map_err(|_| VaultError::DecryptionFailure)?;
    let payload_end = LENGTH_PREFIX
        .checked_add(payload_len)
        .filter(|end| *end <= stream.len())
        .ok_or(VaultError::DecryptionFailure)?;

    Ok((header, Zeroizing::new(stream[LENGTH_PREFIX..payload_end].to_vec())))
}

/// Parse the header without authenticating it.
///
/// Only suitable for diagnostics; trust nothing here until
/// [`open_image`] succeeds.
pub fn read_header(image: &[u8]) -> Result<ContainerHeader> {
    if image.len() < HEADER_LEN || image[..8] != MAGIC {
        return Err(VaultError::DecryptionFailure);
    }
    let format_version = u16::from_le_bytes([image[8], image[9]]);
    let page_size = u32::from_le_bytes([image[10], image[11], image[12], image[13]]);
    let page_count = u32::from_le_bytes([image[14], image[15], image[16], image[17]]);
    let mut id = [0u8; 16];
    id.copy_from_slice(&image[18..34]);

    Ok(ContainerHeader {
        format_version,
        page_size,
        page_count,
        vault_id: Uuid::from_bytes(id),
    })
}

fn encode_header_prefix(header: &ContainerHeader) -> [u8; HEADER_PREFIX_LEN] {
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    prefix[..8].copy_from_slice(&MAGIC);
    prefix[8..10].copy_from_slice(&header.format_version.to_le_bytes());
    prefix[10..14].copy_from_slice(&header.page_size.to_le_bytes());
    prefix[14..18].copy_from_slice(&header.page_count.to_le_bytes());
    prefix[18..34].copy_from_slice(header.vault_id.as_bytes());
    prefix
}

fn page_aad(header: &ContainerHeader, index: u32) -> [u8; 24] {
    let mut aad = [0u8; 24];
    aad[..16].copy_from_slice(header.vault_id.as_bytes());
    aad[16..20].copy_from_slice(&index.to_le_bytes());
    aad[20..24].copy_from_slice(&header.page_count.to_le_bytes());
    aad
}
