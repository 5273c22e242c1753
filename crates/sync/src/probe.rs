//! Identify a device and check it is safe to pull logs from.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use rlogsync_config::SyncSettings;
use rlogsync_remote::RemoteAccess;
use rlogsync_remote::error::ErrorKind as RemoteErrorKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The device is parked; sync with this dongle id.
    Ready { dongle_id: String },
    /// The device should be left alone for now.
    Skip { reason: String },
}

/// Read the dongle id and, when required, the offroad flag.
///
/// A device whose offroad flag is missing or anything other than `1` is
/// treated as driving. This is the first command a session runs, so losing
/// the connection here reports the device as unreachable.
pub async fn probe(remote: &dyn RemoteAccess, label: &str, settings: &SyncSettings) -> Result<Probe> {
    let dongle_id = match remote.read_to_string(&settings.dongle_id_path).await {
        Ok(id) => id.trim().to_string(),
        Err(err) if err.is_session_fatal() => return Err(err).or_raise(|| ErrorKind::Connection(label.to_string())),
        Err(err) => return Err(err).or_raise(|| ErrorKind::Probe(label.to_string())),
    };
    if dongle_id.is_empty() {
        exn::bail!(ErrorKind::Probe(label.to_string()));
    }
    if !settings.require_offroad {
        return Ok(Probe::Ready { dongle_id });
    }
    match remote.read_to_string(&settings.offroad_path).await {
        Ok(flag) if flag.trim() == "1" => Ok(Probe::Ready { dongle_id }),
        Ok(flag) => Ok(Probe::Skip {
            reason: format!("onroad (IsOffroad = {:?})", flag.trim()),
        }),
        Err(err) if matches!(&*err, RemoteErrorKind::NotFound(_)) => Ok(Probe::Skip {
            reason: "onroad (IsOffroad missing)".to_string(),
        }),
        Err(err) => Err(err).or_raise(|| ErrorKind::Probe(label.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlogsync_remote::MockRemote;

    const DONGLE: &str = "/data/params/d/DongleId";
    const OFFROAD: &str = "/data/params/d/IsOffroad";

    #[tokio::test]
    async fn ready_when_offroad() {
        let remote = MockRemote::new("comma@tici").with_file(DONGLE, "1a2b3c4d\n").with_file(OFFROAD, "1");
        let probe = probe(&remote, "tici", &SyncSettings::default()).await.unwrap();
        assert_eq!(probe, Probe::Ready { dongle_id: "1a2b3c4d".into() });
    }

    #[tokio::test]
    async fn skipped_when_onroad() {
        let remote = MockRemote::new("comma@tici").with_file(DONGLE, "1a2b3c4d").with_file(OFFROAD, "0\n");
        let probe = probe(&remote, "tici", &SyncSettings::default()).await.unwrap();
        assert!(matches!(probe, Probe::Skip { reason } if reason.starts_with("onroad")));
    }

    #[tokio::test]
    async fn missing_flag_counts_as_onroad() {
        let remote = MockRemote::new("comma@tici").with_file(DONGLE, "1a2b3c4d");
        let probe = probe(&remote, "tici", &SyncSettings::default()).await.unwrap();
        assert!(matches!(probe, Probe::Skip { .. }));
    }

    #[tokio::test]
    async fn offroad_check_can_be_disabled() {
        let remote = MockRemote::new("comma@tici").with_file(DONGLE, "1a2b3c4d");
        let settings = SyncSettings {
            require_offroad: false,
            ..SyncSettings::default()
        };
        assert!(matches!(probe(&remote, "tici", &settings).await.unwrap(), Probe::Ready { .. }));
    }

    #[tokio::test]
    async fn empty_dongle_id_is_an_error() {
        let remote = MockRemote::new("comma@tici").with_file(DONGLE, "  \n").with_file(OFFROAD, "1");
        let err = probe(&remote, "tici", &SyncSettings::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Probe(label) if label == "tici"));
    }

    #[tokio::test]
    async fn lost_connection_is_unreachable() {
        let remote = MockRemote::new("comma@tici").with_file(DONGLE, "1a2b3c4d").dropped();
        let err = probe(&remote, "tici", &SyncSettings::default()).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn unreadable_dongle_id_is_an_error() {
        let remote = MockRemote::new("comma@tici");
        let err = probe(&remote, "tici", &SyncSettings::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Probe(_)));
    }
}
