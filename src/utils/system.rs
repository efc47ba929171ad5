// src/utils/system.rs: System functions

use std::fs;
use std::path::PathBuf;

use sysinfo::System;

/// Number of workers for threaded execution of a pipeline.
/// One per command, bounded by the physical cores, never fewer than two.
///
/// # Arguments
///
/// * `commands` - Number of commands in the pipeline.
///
/// # Returns
///
/// usize worker count
pub fn compute_worker_threads(commands: usize) -> usize {
    let physical_cores = System::physical_core_count().unwrap_or(1);
    commands.min(physical_cores).max(2)
}

/// Searches for a directory for RAM temp files.
/// Prefers /dev/shm (RAM disk) for linux, otherwise returns the standard temp dir.
///
/// # Returns
/// PathBuf: temp dir for RAM files.
pub fn get_ram_temp_dir() -> PathBuf {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        if let Ok(metadata) = fs::metadata("/dev/shm") {
            if metadata.is_dir() {
                return PathBuf::from("/dev/shm");
            }
        }
        std::env::temp_dir()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        std::env::temp_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_threads_bounds() {
        assert!(compute_worker_threads(0) >= 2);
        assert!(compute_worker_threads(1) >= 2);
        assert!(compute_worker_threads(1000) <= 1000);
    }

    #[test]
    fn test_ram_temp_dir_exists() {
        assert!(get_ram_temp_dir().is_dir());
    }
}
