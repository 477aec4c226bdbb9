// This module integrates generated functions with the Linux perf sampling profiler through the
// JIT map convention: each line of /tmp/perf-<pid>.map names one address range. The map file
// is opened lazily on first registration and kept open for appends. On other platforms and
// architectures registration does nothing.

//! Profiler symbol registration.

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod imp {
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};

    fn map_file() -> &'static Mutex<Option<File>> {
        static MAP: OnceLock<Mutex<Option<File>>> = OnceLock::new();
        MAP.get_or_init(|| {
            let path = format!("/tmp/perf-{}.map", std::process::id());
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| log::warn!("cannot open perf map {}: {}", path, err))
                .ok();
            Mutex::new(file)
        })
    }

    pub fn register(name: &str, addr: usize, size: usize) {
        let Ok(mut guard) = map_file().lock() else {
            return;
        };
        if let Some(file) = guard.as_mut() {
            if let Err(err) = writeln!(file, "{:x} {:x} {}", addr, size, name) {
                log::warn!("cannot write perf map entry for {}: {}", name, err);
            }
        }
    }
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
mod imp {
    pub fn register(_name: &str, _addr: usize, _size: usize) {}
}

/// Announce `[addr, addr + size)` to the profiler under `name`.
pub fn register(name: &str, addr: usize, size: usize) {
    if size == 0 {
        return;
    }
    let fallback;
    let name = if name.is_empty() {
        fallback = format!("kernjit_{:x}", addr);
        fallback.as_str()
    } else {
        name
    };
    log::debug!("perf map: {:#x}+{:#x} {}", addr, size, name);
    imp::register(name, addr, size);
}
