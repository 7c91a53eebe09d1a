/// Max length of a reservation purpose, in bytes.
pub const MAX_PURPOSE_LEN: usize = 1024;

/// Max length of a room or requester display name, in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of a room category, in bytes.
pub const MAX_KIND_LEN: usize = 64;
