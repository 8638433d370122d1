//! Content types served by a Nix binary cache.

/// The `nix-cache-info` document at the cache root.
pub const NIX_CACHE_INFO: &str = "text/x-nix-cache-info";

/// A narinfo manifest.
pub const NARINFO: &str = "text/x-nix-narinfo";
