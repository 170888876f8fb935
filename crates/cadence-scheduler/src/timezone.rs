use chrono_tz::Tz;
use tracing::{debug, warn};

/// Zone used when neither configuration nor host detection yields one.
pub const FALLBACK_TIMEZONE: Tz = chrono_tz::UTC;

/// Pick the schedule's timezone: the configured IANA name if valid,
/// otherwise the host zone, otherwise UTC.
pub fn detect_timezone(configured: Option<&str>) -> Tz {
    if let Some(name) = configured {
        match name.parse::<Tz>() {
            Ok(tz) => return tz,
            Err(_) => warn!(timezone = %name, "configured timezone is not a valid IANA name"),
        }
    }

    match iana_time_zone::get_timezone() {
        Ok(name) => match name.parse::<Tz>() {
            Ok(tz) => {
                debug!(timezone = %tz, "using host timezone");
                tz
            }
            Err(_) => {
                warn!(timezone = %name, fallback = %FALLBACK_TIMEZONE, "host timezone not recognised");
                FALLBACK_TIMEZONE
            }
        },
        Err(e) => {
            warn!(error = %e, fallback = %FALLBACK_TIMEZONE, "timezone detection failed");
            FALLBACK_TIMEZONE
        }
    }
}
