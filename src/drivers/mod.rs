pub mod mavlink;
pub mod tlc59711;
