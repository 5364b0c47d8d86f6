//! Worker and host identity (§3 "Worker"/"Host").

/// `"<hostname>:<pid>:<runtime-version>"`, unique enough to identify a worker process
/// within a host and survive a restart under a new pid.
pub fn worker_id() -> String {
    format!("{}:{}:{}", hostname(), std::process::id(), runtime_version())
}

pub fn hostname() -> String {
    hostname_inner().unwrap_or_else(|| "unknown-host".to_string())
}

pub fn runtime_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(unix)]
fn hostname_inner() -> Option<String> {
    let mut buf = vec![0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..len].to_vec()).ok()
}

#[cfg(not(unix))]
fn hostname_inner() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_has_three_colon_separated_parts() {
        let id = worker_id();
        assert_eq!(id.split(':').count(), 3);
    }
}
