// =============================================================================
// FerrumOS — Ramdisk (initrd) Driver
// =============================================================================
//
// Serves files out of a flat in-memory image. Since no boot module is
// loaded yet, the driver fabricates a small demo image at init time and
// then treats it exactly like a loaded one.
//
// IMAGE FORMAT (little-endian, interleaved):
//
//   ┌──────────────┬──────────┬─────────┬──────────┬─────────┬──
//   │ nfiles (u32) │ header 0 │ data 0  │ header 1 │ data 1  │ …
//   └──────────────┴──────────┴─────────┴──────────┴─────────┴──
//
//   Each 44-byte header is:
//     offset 0   magic   (u8)  — 0xBF
//     offset 1   name    ([u8; 32], NUL-padded)
//     offset 36  offset  (u32) — absolute byte offset of the data
//     offset 40  length  (u32) — data length in bytes
//
//   A file's data immediately follows its header, so a parser advances by
//   44 + length per record. The `offset` field is still absolute; `read`
//   goes through it rather than assuming adjacency.
//
// The driver parses the image once into a file table; the synthetic root
// directory's finddir/readdir walk that table linearly.
//
// =============================================================================

use alloc::string::String;
use alloc::vec::Vec;
use spin::Once;

use crate::fs::vfs::{NodeFlags, NodeOps, VfsNode};

/// Per-file header magic.
pub const INITRD_MAGIC: u8 = 0xBF;

/// Fixed image buffer size.
pub const IMAGE_SIZE: usize = 1024;

/// Bytes in a file header's name field.
const NAME_LEN: usize = 32;

// Header field offsets; the layout matches a C struct with natural
// alignment (magic, name[32], 3 pad bytes, offset, length).
const HEADER_SIZE: usize = 44;
const MAGIC_OFF: usize = 0;
const NAME_OFF: usize = 1;
const OFFSET_OFF: usize = 36;
const LENGTH_OFF: usize = 40;

/// One parsed file record.
struct FileEntry {
    name: String,
    offset: u32,
    length: u32,
}

/// The parsed ramdisk: the raw image plus its file table.
pub struct Ramdisk {
    image: [u8; IMAGE_SIZE],
    files: Vec<FileEntry>,
}

impl Ramdisk {
    /// Serialize `files` into an image buffer.
    ///
    /// Records that would overflow the buffer are dropped (with the file
    /// count adjusted) rather than truncated mid-record.
    pub fn build_image(files: &[(&str, &[u8])]) -> [u8; IMAGE_SIZE] {
        let mut image = [0u8; IMAGE_SIZE];
        let mut cursor = 4usize;
        let mut written = 0u32;

        for (name, data) in files {
            if cursor + HEADER_SIZE + data.len() > IMAGE_SIZE {
                break;
            }
            let header = cursor;
            image[header + MAGIC_OFF] = INITRD_MAGIC;
            for (i, b) in name.bytes().take(NAME_LEN - 1).enumerate() {
                image[header + NAME_OFF + i] = b;
            }
            let data_off = (header + HEADER_SIZE) as u32;
            image[header + OFFSET_OFF..header + OFFSET_OFF + 4]
                .copy_from_slice(&data_off.to_le_bytes());
            image[header + LENGTH_OFF..header + LENGTH_OFF + 4]
                .copy_from_slice(&(data.len() as u32).to_le_bytes());
            image[header + HEADER_SIZE..header + HEADER_SIZE + data.len()].copy_from_slice(data);

            cursor += HEADER_SIZE + data.len();
            written += 1;
        }

        image[0..4].copy_from_slice(&written.to_le_bytes());
        image
    }

    /// The demo image: one file, `hello.txt`, with a NUL-terminated
    /// greeting (17 bytes).
    pub fn build_demo_image() -> [u8; IMAGE_SIZE] {
        Self::build_image(&[("hello.txt", b"Hello VFS World!\0")])
    }

    /// Parse an image into a file table. Records with a bad magic end the
    /// walk — everything before them stays usable.
    pub fn from_image(image: [u8; IMAGE_SIZE]) -> Self {
        let nfiles = u32::from_le_bytes(image[0..4].try_into().unwrap()) as usize;
        let mut files = Vec::new();
        let mut cursor = 4usize;

        for index in 0..nfiles {
            if cursor + HEADER_SIZE > IMAGE_SIZE {
                break;
            }
            if image[cursor + MAGIC_OFF] != INITRD_MAGIC {
                klog::warn!("initrd: bad magic in header {}, stopping parse", index);
                break;
            }
            let name_field = &image[cursor + NAME_OFF..cursor + NAME_OFF + NAME_LEN];
            let name_end = name_field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
            let name = core::str::from_utf8(&name_field[..name_end])
                .unwrap_or("<invalid>")
                .into();
            let offset = u32::from_le_bytes(
                image[cursor + OFFSET_OFF..cursor + OFFSET_OFF + 4]
                    .try_into()
                    .unwrap(),
            );
            let length = u32::from_le_bytes(
                image[cursor + LENGTH_OFF..cursor + LENGTH_OFF + 4]
                    .try_into()
                    .unwrap(),
            );

            files.push(FileEntry {
                name,
                offset,
                length,
            });
            cursor += HEADER_SIZE + length as usize;
        }

        Self { image, files }
    }

    /// Number of files in the table.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Copy `[offset, offset + buf.len())` of file `index` into `buf`,
    /// clamped against the file's length. Returns the bytes copied —
    /// zero when `offset` is at or past the end.
    fn read_file(&self, index: usize, offset: u32, buf: &mut [u8]) -> u32 {
        let Some(entry) = self.files.get(index) else {
            return 0;
        };
        if offset >= entry.length {
            return 0;
        }
        let count = (buf.len() as u32).min(entry.length - offset) as usize;
        let start = entry.offset as usize + offset as usize;
        if start + count > IMAGE_SIZE {
            return 0;
        }
        buf[..count].copy_from_slice(&self.image[start..start + count]);
        count as u32
    }

    /// Build the VFS node describing file `index`.
    fn node(&self, index: usize) -> Option<VfsNode> {
        let entry = self.files.get(index)?;
        Some(VfsNode {
            name: entry.name.clone(),
            flags: NodeFlags::FILE,
            inode: index as u32,
            length: entry.length,
            ops: &FILE_OPS,
        })
    }

    /// Linear name lookup across the file table.
    fn find(&self, name: &str) -> Option<VfsNode> {
        (0..self.files.len())
            .find(|&i| self.files[i].name == name)
            .and_then(|i| self.node(i))
    }
}

// =============================================================================
// VFS glue
// =============================================================================

static RAMDISK: Once<Ramdisk> = Once::new();

/// Operations for ramdisk file nodes: read only.
struct InitrdFileOps;

impl NodeOps for InitrdFileOps {
    fn read(&self, node: &VfsNode, offset: u32, buf: &mut [u8]) -> u32 {
        match RAMDISK.get() {
            Some(rd) => rd.read_file(node.inode as usize, offset, buf),
            None => 0,
        }
    }
}

/// Operations for the synthetic root directory: lookup and enumeration.
struct InitrdRootOps;

impl NodeOps for InitrdRootOps {
    fn finddir(&self, _node: &VfsNode, name: &str) -> Option<VfsNode> {
        RAMDISK.get()?.find(name)
    }

    fn readdir(&self, _node: &VfsNode, index: usize) -> Option<VfsNode> {
        RAMDISK.get()?.node(index)
    }
}

static FILE_OPS: InitrdFileOps = InitrdFileOps;
static ROOT_OPS: InitrdRootOps = InitrdRootOps;

/// Build the demo image, parse it, and return the root directory node.
pub fn init() -> VfsNode {
    let rd = RAMDISK.call_once(|| Ramdisk::from_image(Ramdisk::build_demo_image()));
    klog::info!("initrd: {} file(s) in image", rd.file_count());

    VfsNode {
        name: String::from("initrd"),
        flags: NodeFlags::DIRECTORY,
        inode: 0,
        length: 0,
        ops: &ROOT_OPS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::vfs;

    #[test]
    fn demo_image_has_one_seventeen_byte_file() {
        let rd = Ramdisk::from_image(Ramdisk::build_demo_image());
        assert_eq!(rd.file_count(), 1);
        assert_eq!(rd.files[0].name, "hello.txt");
        assert_eq!(rd.files[0].length, 17);
    }

    #[test]
    fn read_returns_content_with_terminator() {
        let rd = Ramdisk::from_image(Ramdisk::build_demo_image());
        let mut buf = [0u8; 32];
        let n = rd.read_file(0, 0, &mut buf);
        assert_eq!(n, 17);
        assert_eq!(&buf[..17], b"Hello VFS World!\0");
    }

    #[test]
    fn read_past_end_returns_zero() {
        let rd = Ramdisk::from_image(Ramdisk::build_demo_image());
        let mut buf = [0u8; 32];
        assert_eq!(rd.read_file(0, 20, &mut buf), 0);
        assert_eq!(rd.read_file(0, 17, &mut buf), 0);
    }

    #[test]
    fn read_clamps_against_length() {
        let rd = Ramdisk::from_image(Ramdisk::build_demo_image());
        let mut buf = [0u8; 32];
        // Start 5 bytes in: only 12 bytes remain.
        let n = rd.read_file(0, 5, &mut buf);
        assert_eq!(n, 12);
        assert_eq!(&buf[..12], b" VFS World!\0");
    }

    #[test]
    fn short_buffer_limits_the_copy() {
        let rd = Ramdisk::from_image(Ramdisk::build_demo_image());
        let mut buf = [0u8; 5];
        assert_eq!(rd.read_file(0, 0, &mut buf), 5);
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn multi_file_images_parse_with_interleaved_layout() {
        let image = Ramdisk::build_image(&[
            ("a.txt", b"alpha"),
            ("b.txt", b"bravo-bravo"),
            ("c.txt", b"x"),
        ]);
        let rd = Ramdisk::from_image(image);
        assert_eq!(rd.file_count(), 3);
        assert_eq!(rd.files[1].name, "b.txt");

        let mut buf = [0u8; 16];
        assert_eq!(rd.read_file(1, 0, &mut buf), 11);
        assert_eq!(&buf[..11], b"bravo-bravo");
        assert_eq!(rd.read_file(2, 0, &mut buf), 1);
        assert_eq!(&buf[..1], b"x");
    }

    #[test]
    fn corrupt_magic_stops_the_parse_safely() {
        let mut image = Ramdisk::build_image(&[("a.txt", b"alpha"), ("b.txt", b"bravo")]);
        // Corrupt the second header's magic (4 + 44 + 5 bytes in).
        image[4 + HEADER_SIZE + 5] = 0;
        let rd = Ramdisk::from_image(image);
        assert_eq!(rd.file_count(), 1);
        assert_eq!(rd.files[0].name, "a.txt");
    }

    #[test]
    fn long_names_are_truncated_not_overflowed() {
        let long = "a".repeat(64);
        let image = Ramdisk::build_image(&[(long.as_str(), b"data")]);
        let rd = Ramdisk::from_image(image);
        assert_eq!(rd.files[0].name.len(), NAME_LEN - 1);
    }

    #[test]
    fn oversized_input_drops_trailing_files() {
        let big = [0x55u8; 600];
        let image = Ramdisk::build_image(&[("one", &big), ("two", &big)]);
        let rd = Ramdisk::from_image(image);
        assert_eq!(rd.file_count(), 1);
    }

    #[test]
    fn vfs_lookup_and_read_through_the_root_node() {
        let root = init();
        assert!(root.flags.is_directory());

        let node = vfs::finddir(&root, "hello.txt").expect("hello.txt present");
        assert!(node.flags.is_file());
        assert_eq!(node.length, 17);

        let mut buf = [0u8; 32];
        assert_eq!(vfs::read(&node, 0, 32, &mut buf), 17);
        assert_eq!(&buf[..17], b"Hello VFS World!\0");
        assert_eq!(vfs::read(&node, 20, 32, &mut buf), 0);

        assert!(vfs::finddir(&root, "missing.txt").is_none());
        // Files are not directories: finddir on them short-circuits.
        assert!(vfs::finddir(&node, "hello.txt").is_none());
    }

    #[test]
    fn readdir_enumerates_in_table_order() {
        let root = init();
        let first = vfs::readdir(&root, 0).expect("one file");
        assert_eq!(first.name, "hello.txt");
        assert!(vfs::readdir(&root, 1).is_none());
    }
}
