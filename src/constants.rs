use phf::phf_map;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub static CODES: phf::Map<u32, &'static str> = phf_map! {
    100u32 => "OK",
    101u32 => "Unknown error",
    102u32 => "Unsupported version",
    103u32 => "Request not permitted",
    104u32 => "User already logged in",
    105u32 => "User is not logged in",
    106u32 => "Username or password is incorrect",
    107u32 => "User does not have necessary permissions",
    203u32 => "Password is incorrect",
    205u32 => "User does not exist",
    207u32 => "Blacklisted",
    515u32 => "Upgrade successful",
};

/// Labels for the `Event` letter the camera stores with each indexed file.
pub static EVENT_LABELS: phf::Map<&'static str, &'static str> = phf_map! {
    "M" => "Motion",
    "H" => "Human",
    "V" => "Camera mask",
    "L" => "Video loss",
    "A" => "Local alarm",
    "*" => "Event",
};

pub const OK_CODES: &[u32] = &[100, 515];

pub const TCP_PORT: u16 = 34567;

// Message ids
pub const LOGIN: u16 = 1000;
pub const PLAYBACK_CONTROL: u16 = 1420;
pub const PLAYBACK_CLAIM: u16 = 1424;
pub const ARCHIVE_STREAM: u16 = 1426;
pub const FILE_QUERY: u16 = 1440;

pub const HEAD_MAGIC: u8 = 0xFF;

// Block tags of the archive media container, read big-endian.
pub const TAG_VIDEO_I: u32 = 0x1FC;
pub const TAG_VIDEO_JPEG: u32 = 0x1FE;
pub const TAG_AUDIO: u32 = 0x1FD;
pub const TAG_AUX_INFO: u32 = 0x1F9;
pub const TAG_AUX_AUDIO: u32 = 0x1FA;
pub const TAG_JPEG_SOI: u32 = 0xFFD8FFE0;

pub fn describe_code(code: u32) -> &'static str {
    CODES.get(&code).copied().unwrap_or("Unrecognised status")
}

pub fn event_label(code: &str) -> String {
    EVENT_LABELS
        .get(code)
        .map(|label| label.to_string())
        .unwrap_or_else(|| code.to_string())
}
