use std::borrow::Cow;

/// Provider identifier - mostly static constants
pub type ProviderId = Cow<'static, str>;

/// Unix timestamp in seconds
pub type UnixSeconds = i64;
