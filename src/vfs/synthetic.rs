//! The two fixed entries fabricated at the virtual root: a hidden folder
//! customization file and the drive icon. Neither has a remote
//! counterpart; both are hidden, system, read-only.

use crate::vfs::entry::FileEntry;

pub const INI_FILE_NAME: &str = "desktop.ini";
pub const ICON_FILE_NAME: &str = "favicon.ico";

/// Minimal valid 1x1 32-bit icon in the MEGA red.
pub const ICON_BYTES: &[u8] = &[
    // ICONDIR: reserved, type 1 (icon), 1 image
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00,
    // ICONDIRENTRY: 1x1, 0 colors, reserved, 1 plane, 32 bpp,
    // 48 bytes of data at offset 22
    0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00,
    0x30, 0x00, 0x00, 0x00, 0x16, 0x00, 0x00, 0x00,
    // BITMAPINFOHEADER: 40 bytes, 1x2 (XOR + AND), 1 plane, 32 bpp
    0x28, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    // XOR pixel (BGRA): #D9002D, opaque
    0x2d, 0x00, 0xd9, 0xff,
    // AND mask row
    0x00, 0x00, 0x00, 0x00,
];

/// Folder customization template embedding the mounted account.
pub fn ini_content(email: &str) -> String {
    format!(
        "[.ShellClassInfo]\r\n\
         ConfirmFileOp=0\r\n\
         NoSharing=1\r\n\
         IconFile={}\r\n\
         IconIndex=0\r\n\
         InfoTip=The MEGA.NZ file volume associated with the account '{}'.",
        ICON_FILE_NAME, email
    )
}

/// Fold a virtual path to the canonical separator, keeping the case of
/// every segment: creations and renames pass segment names through to
/// the remote verbatim.
pub fn fold_separators(path: &str) -> String {
    path.trim().replace('\\', "/")
}

/// Normalize a virtual path for synthetic-name comparison: trimmed,
/// backslashes folded to slashes, lowercased.
pub fn normalize(path: &str) -> String {
    fold_separators(path).to_lowercase()
}

pub fn is_ini_path(path: &str) -> bool {
    normalize(path) == format!("/{}", INI_FILE_NAME)
}

pub fn is_icon_path(path: &str) -> bool {
    normalize(path) == format!("/{}", ICON_FILE_NAME)
}

pub fn is_synthetic_path(path: &str) -> bool {
    is_ini_path(path) || is_icon_path(path)
}

pub fn is_root_path(path: &str) -> bool {
    normalize(path) == "/"
}

/// The fixed entries appended to a root listing.
pub fn root_entries(email: &str) -> Vec<FileEntry> {
    vec![
        FileEntry::synthetic(INI_FILE_NAME, ini_content(email).len() as u64),
        FileEntry::synthetic(ICON_FILE_NAME, ICON_BYTES.len() as u64),
    ]
}
