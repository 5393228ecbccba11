pub mod paths;

/// Returns the `uid:gid` pair the bundling container runs as.
#[cfg(unix)]
pub fn process_user() -> String {
  let uid = rustix::process::getuid().as_raw();
  let gid = rustix::process::getgid().as_raw();
  format!("{uid}:{gid}")
}

/// Returns the `uid:gid` pair the bundling container runs as.
///
/// Windows hosts have no numeric ids; containers default to this pair.
#[cfg(not(unix))]
pub fn process_user() -> String {
  "1000:1000".to_string()
}

/// Number of CPUs available to this process, at least one.
pub fn available_parallelism() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn process_user_is_uid_gid_pair() {
    let user = process_user();
    let (uid, gid) = user.split_once(':').expect("uid:gid");
    assert!(uid.parse::<u32>().is_ok());
    assert!(gid.parse::<u32>().is_ok());
  }

  #[test]
  fn parallelism_is_positive() {
    assert!(available_parallelism() >= 1);
  }
}
