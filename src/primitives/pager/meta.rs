use std::convert::TryInto;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::pager::{Pager, PagerOptions};
use crate::types::{page_crc32, Generation, PageId, Result, TreeError};

const IMAGE_MAGIC: [u8; 8] = *b"COWTREE1";
const IMAGE_FORMAT_VERSION: u16 = 1;
const IMAGE_SALT: u64 = 0x636f_7774_7265_6531;
const NO_PAGE: u64 = u64::MAX;

const IMG_MAGIC: Range<usize> = 0..8;
const IMG_PAGE_SIZE: Range<usize> = 8..12;
const IMG_FORMAT_VERSION: Range<usize> = 12..14;
const IMG_RESERVED: Range<usize> = 14..16;
const IMG_PAGE_COUNT: Range<usize> = 16..24;
const IMG_ROOT: Range<usize> = 24..32;
const IMG_ROOT_GENERATION: Range<usize> = 32..40;
const IMG_STABLE_GENERATION: Range<usize> = 40..48;
const IMG_UNSTABLE_GENERATION: Range<usize> = 48..56;
const IMG_FREE_LIST_HEAD: Range<usize> = 56..64;
const IMG_KEY_FORMAT: usize = 64;
const IMG_RESERVED_2: Range<usize> = 65..68;
const IMG_KEY_SIZE: Range<usize> = 68..72;
const IMG_VALUE_SIZE: Range<usize> = 72..76;
const IMG_HEADER_CRC: Range<usize> = 76..80;
const IMAGE_HEADER_LEN: usize = 80;

/// How keys are encoded in tree pages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFormatKind {
    /// Order-preserving big-endian u64 keys.
    U64,
    /// Fixed-width byte strings compared lexicographically.
    Bytes,
}

/// Key and value widths a tree was written with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyFormat {
    /// Key encoding.
    pub kind: KeyFormatKind,
    /// Bytes per key.
    pub key_size: u32,
    /// Bytes per leaf value.
    pub value_size: u32,
}

/// Tree state stored alongside a page image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeMeta {
    /// Root node of the tree.
    pub root: PageId,
    /// Generation the root pointer promises.
    pub root_generation: Generation,
    /// Newest generation all writers have completed.
    pub stable_generation: Generation,
    /// Generation in-flight writers stamp.
    pub unstable_generation: Generation,
    /// First free-list page, if the store has one.
    pub free_list_head: Option<PageId>,
    /// Key layout of the tree pages.
    pub key_format: KeyFormat,
}

impl KeyFormatKind {
    fn as_u8(self) -> u8 {
        match self {
            KeyFormatKind::U64 => 1,
            KeyFormatKind::Bytes => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(KeyFormatKind::U64),
            2 => Ok(KeyFormatKind::Bytes),
            _ => Err(TreeError::Corruption("unknown key format in image header")),
        }
    }
}

fn encode_header(page_size: u32, page_count: u64, meta: &TreeMeta) -> [u8; IMAGE_HEADER_LEN] {
    let mut hdr = [0u8; IMAGE_HEADER_LEN];
    hdr[IMG_MAGIC].copy_from_slice(&IMAGE_MAGIC);
    hdr[IMG_PAGE_SIZE].copy_from_slice(&page_size.to_be_bytes());
    hdr[IMG_FORMAT_VERSION].copy_from_slice(&IMAGE_FORMAT_VERSION.to_be_bytes());
    hdr[IMG_PAGE_COUNT].copy_from_slice(&page_count.to_be_bytes());
    hdr[IMG_ROOT].copy_from_slice(&meta.root.0.to_be_bytes());
    hdr[IMG_ROOT_GENERATION].copy_from_slice(&meta.root_generation.0.to_be_bytes());
    hdr[IMG_STABLE_GENERATION].copy_from_slice(&meta.stable_generation.0.to_be_bytes());
    hdr[IMG_UNSTABLE_GENERATION].copy_from_slice(&meta.unstable_generation.0.to_be_bytes());
    let head = meta.free_list_head.map(|p| p.0).unwrap_or(NO_PAGE);
    hdr[IMG_FREE_LIST_HEAD].copy_from_slice(&head.to_be_bytes());
    hdr[IMG_KEY_FORMAT] = meta.key_format.kind.as_u8();
    hdr[IMG_KEY_SIZE].copy_from_slice(&meta.key_format.key_size.to_be_bytes());
    hdr[IMG_VALUE_SIZE].copy_from_slice(&meta.key_format.value_size.to_be_bytes());
    let crc = crc32fast::hash(&hdr[..IMG_HEADER_CRC.start]);
    hdr[IMG_HEADER_CRC].copy_from_slice(&crc.to_be_bytes());
    hdr
}

fn read_u64(hdr: &[u8], range: Range<usize>) -> u64 {
    u64::from_be_bytes(hdr[range].try_into().unwrap())
}

fn read_u32(hdr: &[u8], range: Range<usize>) -> u32 {
    u32::from_be_bytes(hdr[range].try_into().unwrap())
}

fn decode_header(hdr: &[u8; IMAGE_HEADER_LEN]) -> Result<(u32, u64, TreeMeta)> {
    if hdr[IMG_MAGIC] != IMAGE_MAGIC {
        return Err(TreeError::Corruption("invalid image magic"));
    }
    let crc = read_u32(hdr, IMG_HEADER_CRC);
    if crc != crc32fast::hash(&hdr[..IMG_HEADER_CRC.start]) {
        return Err(TreeError::Corruption("image header crc mismatch"));
    }
    let version = u16::from_be_bytes(hdr[IMG_FORMAT_VERSION].try_into().unwrap());
    if version != IMAGE_FORMAT_VERSION {
        return Err(TreeError::Corruption("unsupported image format version"));
    }
    if hdr[IMG_RESERVED] != [0; 2] || hdr[IMG_RESERVED_2] != [0; 3] {
        return Err(TreeError::Corruption("image header reserved bytes not zero"));
    }
    let head = read_u64(hdr, IMG_FREE_LIST_HEAD);
    let meta = TreeMeta {
        root: PageId(read_u64(hdr, IMG_ROOT)),
        root_generation: Generation(read_u64(hdr, IMG_ROOT_GENERATION)),
        stable_generation: Generation(read_u64(hdr, IMG_STABLE_GENERATION)),
        unstable_generation: Generation(read_u64(hdr, IMG_UNSTABLE_GENERATION)),
        free_list_head: (head != NO_PAGE).then_some(PageId(head)),
        key_format: KeyFormat {
            kind: KeyFormatKind::from_u8(hdr[IMG_KEY_FORMAT])?,
            key_size: read_u32(hdr, IMG_KEY_SIZE),
            value_size: read_u32(hdr, IMG_VALUE_SIZE),
        },
    };
    Ok((
        read_u32(hdr, IMG_PAGE_SIZE),
        read_u64(hdr, IMG_PAGE_COUNT),
        meta,
    ))
}

/// Writes every page of `pager` plus `meta` to `path`.
///
/// Each page is copied under the pager's read validation and followed by its
/// CRC32, so a later load detects bit rot in the file itself.
pub fn save_image(pager: &Pager, meta: &TreeMeta, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let page_count = pager.page_count();
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&encode_header(
        pager.page_size() as u32,
        page_count,
        meta,
    ))?;
    for raw in 0..page_count {
        let image = pager.read_page(PageId(raw))?;
        out.write_all(&image)?;
        out.write_all(&page_crc32(raw, IMAGE_SALT, &image).to_be_bytes())?;
    }
    out.flush()?;
    info!(path = %path.display(), pages = page_count, "page image saved");
    Ok(())
}

/// Loads a page image written by [`save_image`].
pub fn load_image(path: impl AsRef<Path>) -> Result<(Pager, TreeMeta)> {
    let path = path.as_ref();
    let mut input = BufReader::new(File::open(path)?);
    let mut hdr = [0u8; IMAGE_HEADER_LEN];
    input.read_exact(&mut hdr)?;
    let (page_size, page_count, meta) = decode_header(&hdr)?;
    let capacity = usize::try_from(page_count)
        .map_err(|_| TreeError::Corruption("image page count exceeds usize"))?;
    let pager = Pager::new(PagerOptions {
        page_size,
        initial_capacity: capacity,
    })?;
    let mut buf = vec![0u8; page_size as usize];
    let mut crc = [0u8; 4];
    for raw in 0..page_count {
        input.read_exact(&mut buf)?;
        input.read_exact(&mut crc)?;
        if u32::from_be_bytes(crc) != page_crc32(raw, IMAGE_SALT, &buf) {
            return Err(TreeError::Corruption("image page crc mismatch"));
        }
        let id = pager.allocate_page();
        pager.write(id)?.put_bytes(0, &buf)?;
    }
    info!(path = %path.display(), pages = page_count, "page image loaded");
    Ok((pager, meta))
}
