/// Site/queue configuration delivered by the information system.
///
/// The values arrive as strings (the upstream schema is stringly typed)
/// and may be absent or empty; every consumer resolves them with an
/// explicit fallback. Absence of the whole structure is a valid state.
use serde::Deserialize;

/// Default max input size: 14336 MB (14 GiB), the historical agent default.
const DEFAULT_MAX_INPUT_SIZE_MB: u64 = 14 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueData {
    /// Max wall-clock time for a job on this queue, in seconds.
    #[serde(default)]
    pub maxtime: Option<String>,
    /// Max work-directory size for a job on this queue, in MB.
    #[serde(default)]
    pub maxwdir: Option<String>,
}

/// Resolve the session's max running time, in seconds.
///
/// Prefers `queuedata.maxtime` when present, non-empty, and a positive
/// integer; anything else falls back to the supplied default lifetime.
/// Resolved once at loop start and cached for the whole session.
pub fn resolve_max_running_time(queuedata: Option<&QueueData>, default_lifetime: u64) -> u64 {
    let raw = match queuedata.and_then(|qd| qd.maxtime.as_deref()) {
        Some(raw) if !raw.is_empty() => raw,
        _ => {
            tracing::info!(
                max_running_time = default_lifetime,
                "queue maxtime not set, using default lifetime"
            );
            return default_lifetime;
        }
    };

    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => {
            tracing::info!(max_running_time = secs, "using queue maxtime");
            secs
        }
        Ok(_) => {
            tracing::warn!("queue maxtime is zero, using default lifetime");
            default_lifetime
        }
        Err(e) => {
            tracing::warn!(maxtime = raw, error = %e, "bad queue maxtime, using default lifetime");
            default_lifetime
        }
    }
}

/// Resolve the max input size in bytes from `queuedata.maxwdir` (MB),
/// falling back to the 14336 MB agent default on empty or bad values.
pub fn max_input_size_bytes(queuedata: Option<&QueueData>) -> u64 {
    let fallback = DEFAULT_MAX_INPUT_SIZE_MB * 1024 * 1024;
    let raw = match queuedata.and_then(|qd| qd.maxwdir.as_deref()) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return fallback,
    };
    match raw.parse::<u64>() {
        Ok(mb) => mb * 1024 * 1024,
        Err(e) => {
            tracing::warn!(maxwdir = raw, error = %e, "bad queue maxwdir, using default max input size");
            fallback
        }
    }
}

/// Resolve the maximum allowed work-directory size in bytes.
///
/// Prefers `queuedata.maxwdir` (MB converted to bytes); otherwise the
/// max input size plus the stdout size limit, since the work dir holds
/// both the staged inputs and the growing stdout.
pub fn max_allowed_workdir_size(queuedata: Option<&QueueData>, stdout_limit_bytes: u64) -> u64 {
    let maxwdir = queuedata
        .and_then(|qd| qd.maxwdir.as_deref())
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| raw.parse::<u64>().ok());

    match maxwdir {
        Some(mb) => {
            let bytes = mb * 1024 * 1024;
            tracing::info!(limit_bytes = bytes, "work dir size check will use queue maxwdir");
            bytes
        }
        None => {
            let bytes = max_input_size_bytes(queuedata) + stdout_limit_bytes;
            tracing::info!(
                limit_bytes = bytes,
                "work dir size check will use max input size plus stdout limit"
            );
            bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qd(maxtime: Option<&str>, maxwdir: Option<&str>) -> QueueData {
        QueueData {
            maxtime: maxtime.map(String::from),
            maxwdir: maxwdir.map(String::from),
        }
    }

    #[test]
    fn test_maxtime_used_when_valid() {
        let qd = qd(Some("3600"), None);
        assert_eq!(resolve_max_running_time(Some(&qd), 324_000), 3600);
    }

    #[test]
    fn test_maxtime_zero_falls_back_to_default() {
        let qd = qd(Some("0"), None);
        assert_eq!(resolve_max_running_time(Some(&qd), 324_000), 324_000);
    }

    #[test]
    fn test_maxtime_missing_or_empty_falls_back() {
        assert_eq!(resolve_max_running_time(None, 324_000), 324_000);
        let absent = qd(None, None);
        assert_eq!(resolve_max_running_time(Some(&absent), 324_000), 324_000);
        let blank = qd(Some(""), None);
        assert_eq!(resolve_max_running_time(Some(&blank), 324_000), 324_000);
    }

    #[test]
    fn test_maxtime_unparsable_falls_back() {
        let qd = qd(Some("tomorrow"), None);
        assert_eq!(resolve_max_running_time(Some(&qd), 7200), 7200);
    }

    #[test]
    fn test_workdir_limit_from_queue_maxwdir() {
        let qd = qd(None, Some("16336"));
        // 16336 MB -> bytes
        assert_eq!(
            max_allowed_workdir_size(Some(&qd), 2 * 1024 * 1024),
            16336 * 1024 * 1024
        );
    }

    #[test]
    fn test_workdir_limit_fallback_is_input_size_plus_stdout_limit() {
        let stdout_limit = 2 * 1024 * 1024;
        let expected = 14 * 1024 * 1024 * 1024 + stdout_limit;
        assert_eq!(max_allowed_workdir_size(None, stdout_limit), expected);

        let qd = qd(None, Some("not-a-number"));
        assert_eq!(max_allowed_workdir_size(Some(&qd), stdout_limit), expected);
    }

    #[test]
    fn test_max_input_size_default() {
        assert_eq!(max_input_size_bytes(None), 14 * 1024 * 1024 * 1024);
        let qd = qd(None, Some("1024"));
        assert_eq!(max_input_size_bytes(Some(&qd)), 1024 * 1024 * 1024);
    }
}
