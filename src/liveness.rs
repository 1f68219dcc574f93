//! Moves peers whose direct path looks dead over to the relay.
//!
//! This is a heuristic. A peer is given up on when this client kept sending
//! to it directly and heard nothing back (see [`PeerRecord::is_unanswered`]).
//! An unneeded fallback only costs efficiency, so false positives are fine.
//!
//! [`PeerRecord::is_unanswered`]: crate::peer::PeerRecord::is_unanswered

use crate::config::Config;
use crate::coordinator::CoordinatorLink;
use crate::peer::PeerDirectory;
use crate::sync::Exit;
use std::io;
use std::time::{Duration, Instant};

/// Where fallback requests go.
pub trait FallbackRequester {
    fn request_fallback(&self, peer_id: &str) -> io::Result<()>;
}

impl FallbackRequester for CoordinatorLink {
    fn request_fallback(&self, peer_id: &str) -> io::Result<()> {
        CoordinatorLink::request_fallback(self, peer_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LivenessMonitor {
    interval: Duration,
    silence: Duration,
    grace: Duration,
}

impl LivenessMonitor {
    pub fn new(config: &Config) -> Self {
        Self {
            interval: config.liveness_interval,
            silence: config.silence_threshold,
            grace: config.grace_window,
        }
    }

    /// One scan at `now`. Every unanswered peer is marked relayed and gets
    /// exactly one fallback request. Returns the peers moved.
    pub fn tick(
        &self,
        directory: &PeerDirectory,
        requester: &dyn FallbackRequester,
        now: Instant,
    ) -> Vec<String> {
        let mut moved = directory.unanswered(now, self.grace, self.silence);
        moved.retain(|id| directory.mark_relayed(id));

        for id in &moved {
            log::info!("no answer from {} over udp, requesting relay", id);
            if let Err(e) = requester.request_fallback(id) {
                log::warn!("fallback request for {} failed: {}", id, e);
            }
        }

        moved
    }

    /// Tick every interval until `exit` is set.
    pub fn run(&self, directory: &PeerDirectory, requester: &dyn FallbackRequester, exit: &Exit) {
        while !exit.wait_timeout(self.interval) {
            self.tick(directory, requester, Instant::now());
        }
        log::trace!("liveness monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread::spawn;

    #[derive(Default)]
    struct Requests(Mutex<Vec<String>>);

    impl FallbackRequester for Requests {
        fn request_fallback(&self, peer_id: &str) -> io::Result<()> {
            self.0.lock().unwrap().push(peer_id.to_string());
            Ok(())
        }
    }

    fn monitor() -> LivenessMonitor {
        LivenessMonitor::new(&Config::default())
    }

    #[test]
    fn test_fallback_once() {
        let dir = PeerDirectory::default();
        let reqs = Requests::default();
        let m = monitor();
        let t0 = Instant::now();

        dir.upsert_endpoint("bob", "127.0.0.1:4000".parse().unwrap());
        dir.record_tx("bob", t0);

        assert!(m.tick(&dir, &reqs, t0 + Duration::from_secs(5)).is_empty());

        let moved = m.tick(&dir, &reqs, t0 + Duration::from_secs(11));
        assert_eq!(moved, vec!["bob".to_string()]);
        assert!(dir.get("bob").unwrap().relayed);

        assert!(m.tick(&dir, &reqs, t0 + Duration::from_secs(16)).is_empty());
        assert!(m.tick(&dir, &reqs, t0 + Duration::from_secs(60)).is_empty());
        assert_eq!(*reqs.0.lock().unwrap(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_answered_peer_kept() {
        let dir = PeerDirectory::default();
        let reqs = Requests::default();
        let m = monitor();
        let t0 = Instant::now();

        dir.record_tx("bob", t0 + Duration::from_secs(2));
        dir.record_rx("bob", t0);
        dir.record_tx("carol", t0);

        // bob's last receive is within the grace window of its last send
        let moved = m.tick(&dir, &reqs, t0 + Duration::from_secs(30));
        assert_eq!(moved, vec!["carol".to_string()]);
        assert!(!dir.get("bob").unwrap().relayed);
    }

    #[test]
    fn test_already_relayed_skipped() {
        let dir = PeerDirectory::default();
        let reqs = Requests::default();
        let t0 = Instant::now();

        dir.record_tx("bob", t0);
        dir.mark_relayed("bob");

        assert!(monitor().tick(&dir, &reqs, t0 + Duration::from_secs(30)).is_empty());
        assert!(reqs.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_run_stops() {
        let dir = Arc::new(PeerDirectory::default());
        let exit = Arc::new(Exit::default());
        let mut config = Config::default();
        config.liveness_interval = Duration::from_millis(20);
        config.silence_threshold = Duration::ZERO;
        config.grace_window = Duration::ZERO;
        let m = LivenessMonitor::new(&config);

        dir.record_tx("bob", Instant::now());
        let reqs = Arc::new(Requests::default());

        let t = {
            let (dir, exit, reqs) = (dir.clone(), exit.clone(), reqs.clone());
            spawn(move || m.run(&dir, &*reqs, &exit))
        };

        let deadline = Instant::now() + Duration::from_secs(3);
        while !dir.get("bob").unwrap().relayed && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        exit.set();
        t.join().unwrap();

        assert_eq!(*reqs.0.lock().unwrap(), vec!["bob".to_string()]);
    }
}
