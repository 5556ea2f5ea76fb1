use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use sociallink_common::config::{clamp_ban_ttl, MirrorsConfig};
use sociallink_common::MirrorStrategy;
use tracing::info;

use crate::normalize::force_https;

/// Process-local ban table over the configured mirror pool.
pub struct MirrorSelector {
    instances: Vec<String>,
    ban_ttl: Duration,
    strategy: MirrorStrategy,
    state: Mutex<MirrorState>,
}

#[derive(Default)]
struct MirrorState {
    banned_until: HashMap<String, Instant>,
    cursor: usize,
}

impl MirrorSelector {
    /// `ban_ttl` is clamped to one minute..one day.
    pub fn new(instances: &[String], ban_ttl: Duration, strategy: MirrorStrategy) -> Self {
        let mut normalized: Vec<String> = Vec::new();
        for inst in instances {
            let inst = inst.trim();
            if inst.is_empty() {
                continue;
            }
            let base = if inst.contains("://") || inst.starts_with("//") {
                force_https(inst)
            } else {
                format!("https://{}", inst.trim_start_matches('/'))
            };
            let base = base.trim_end_matches('/').to_string();
            if !normalized.contains(&base) {
                normalized.push(base);
            }
        }
        Self {
            instances: normalized,
            ban_ttl: clamp_ban_ttl(ban_ttl),
            strategy,
            state: Mutex::new(MirrorState::default()),
        }
    }

    pub fn from_config(config: &MirrorsConfig) -> Self {
        Self::new(&config.instances, config.ban_ttl(), config.strategy)
    }

    pub fn alive(&self) -> Vec<String> {
        self.alive_at(Instant::now())
    }

    pub fn ban(&self, instance: &str) {
        self.ban_at(instance, Instant::now());
    }

    pub fn sample(&self, n: usize) -> Vec<String> {
        self.sample_at(n, Instant::now())
    }

    /// Configured mirrors whose ban has expired by `now`.
    pub fn alive_at(&self, now: Instant) -> Vec<String> {
        let state = self.lock_state();
        self.alive_in(&state, now)
    }

    pub fn ban_at(&self, instance: &str, now: Instant) {
        let key = force_https(instance).trim_end_matches('/').to_string();
        let until = now + self.ban_ttl;
        self.lock_state().banned_until.insert(key.clone(), until);
        info!(instance = key.as_str(), ttl_secs = self.ban_ttl.as_secs(), "Mirror banned");
    }

    /// Up to `n` unique alive mirrors. Empty when none are alive.
    pub fn sample_at(&self, n: usize, now: Instant) -> Vec<String> {
        let mut state = self.lock_state();
        let mut alive = self.alive_in(&state, now);
        if alive.is_empty() || n == 0 {
            return Vec::new();
        }
        let take = n.min(alive.len());

        match self.strategy {
            MirrorStrategy::RoundRobin => {
                let len = alive.len();
                let start = state.cursor % len;
                let picked: Vec<String> = (0..take).map(|i| alive[(start + i) % len].clone()).collect();
                state.cursor = (start + picked.len()) % len;
                picked
            }
            MirrorStrategy::Random => {
                alive.shuffle(&mut rand::rng());
                alive.truncate(take);
                alive
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn alive_in(&self, state: &MirrorState, now: Instant) -> Vec<String> {
        self.instances
            .iter()
            .filter(|inst| state.banned_until.get(*inst).map_or(true, |until| *until <= now))
            .cloned()
            .collect()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MirrorState> {
        // Every write is a single insert, so a poisoned table is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(strategy: MirrorStrategy) -> MirrorSelector {
        MirrorSelector::new(
            &[
                "https://m1.example/".to_string(),
                "http://m2.example".to_string(),
                "m3.example".to_string(),
                "https://m1.example".to_string(),
            ],
            Duration::from_secs(60),
            strategy,
        )
    }

    #[test]
    fn instances_are_normalized_and_deduped() {
        let sel = pool(MirrorStrategy::Random);
        assert_eq!(
            sel.alive(),
            vec!["https://m1.example", "https://m2.example", "https://m3.example"]
        );
    }

    #[test]
    fn banned_instance_returns_after_ttl() {
        let sel = pool(MirrorStrategy::RoundRobin);
        let t = Instant::now();
        sel.ban_at("https://m2.example/", t);

        let just_before = t + Duration::from_secs(59);
        assert!(!sel.alive_at(just_before).contains(&"https://m2.example".to_string()));
        assert!(!sel.sample_at(3, just_before).contains(&"https://m2.example".to_string()));

        let at_expiry = t + Duration::from_secs(60);
        assert!(sel.alive_at(at_expiry).contains(&"https://m2.example".to_string()));
        assert!(sel.sample_at(3, at_expiry).contains(&"https://m2.example".to_string()));
    }

    #[test]
    fn round_robin_advances_cursor_and_wraps() {
        let sel = pool(MirrorStrategy::RoundRobin);
        let now = Instant::now();
        assert_eq!(sel.sample_at(2, now), vec!["https://m1.example", "https://m2.example"]);
        assert_eq!(sel.sample_at(2, now), vec!["https://m3.example", "https://m1.example"]);
        assert_eq!(sel.sample_at(1, now), vec!["https://m2.example"]);
    }

    #[test]
    fn random_returns_unique_bounded_sample() {
        let sel = pool(MirrorStrategy::Random);
        let picked = sel.sample(2);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0], picked[1]);
        assert_eq!(sel.sample(10).len(), 3);
    }

    #[test]
    fn all_banned_yields_empty() {
        let sel = pool(MirrorStrategy::Random);
        let now = Instant::now();
        for inst in sel.alive_at(now) {
            sel.ban_at(&inst, now);
        }
        assert!(sel.sample_at(3, now).is_empty());
    }

    #[test]
    fn ttl_is_clamped_at_construction() {
        let short = MirrorSelector::new(
            &["https://m1.example".to_string()],
            Duration::from_secs(5),
            MirrorStrategy::RoundRobin,
        );
        let t = Instant::now();
        short.ban_at("https://m1.example", t);
        assert!(short.alive_at(t + Duration::from_secs(5)).is_empty());
        assert!(short.alive_at(t + Duration::from_secs(59)).is_empty());
        assert_eq!(short.alive_at(t + Duration::from_secs(60)).len(), 1);

        let long = MirrorSelector::new(
            &["https://m1.example".to_string()],
            Duration::from_secs(10_000_000),
            MirrorStrategy::RoundRobin,
        );
        long.ban_at("https://m1.example", t);
        assert!(long.alive_at(t + Duration::from_secs(86_399)).is_empty());
        assert_eq!(long.alive_at(t + Duration::from_secs(86_400)).len(), 1);
    }

    #[test]
    fn config_ttl_floor_applies() {
        let config = MirrorsConfig {
            instances: vec!["https://m1.example".to_string()],
            ban_ttl_secs: 1,
            ..MirrorsConfig::default()
        };
        let sel = MirrorSelector::from_config(&config);
        let t = Instant::now();
        sel.ban_at("https://m1.example", t);
        assert!(sel.alive_at(t + Duration::from_secs(30)).is_empty());
        assert_eq!(sel.alive_at(t + Duration::from_secs(60)).len(), 1);
    }
}
