//! Shared constants for file names, markers and environment variables.

/// Default configuration file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "restpack.toml";

/// Overrides `output.images_dir` from the configuration file.
pub const IMAGES_DIR_ENV: &str = "RESTPACK_IMAGES_DIR";

/// Image metadata file, stored next to `rootfs/`.
pub const IMAGE_CONFIG_FILE: &str = "image.json";

/// Directory holding the image filesystem inside an image directory.
pub const ROOTFS_DIR: &str = "rootfs";

pub const IMAGE_FORMAT_VERSION: u32 = 1;

/// Seal written into BuildOutput once the builder stage completes.
/// Excluded from the output hash and never copied into an image.
pub const SEAL_MARKER: &str = ".restpack-output";

/// Marker dropped at the root of every builder work directory.
pub const WORK_MARKER: &str = ".restpack-work";

/// Lock file guarding an images directory.
pub const LOCK_FILENAME: &str = ".lock";

/// 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch)
pub const SOURCE_DATE_EPOCH: &str = "315532800";

/// Subdirectory of the work directory the source tree is staged into.
pub const SOURCE_STAGING_DIR: &str = "source";

/// Work directory entries the pipeline creates for itself.
pub const WORK_RESERVED: [&str; 5] = [SOURCE_STAGING_DIR, "home", "tmp", "target-home", "target-tmp"];
