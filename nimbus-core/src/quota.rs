//! Quota booker - Reserve account quota before issuing creates
//!
//! The booker keeps an in-memory ledger of live reservations. Booking refreshes
//! the observed usage through a [`UsageSource`] and checks
//! `used + reserved + requested <= limit` for every requested kind, all under
//! one lock so concurrent creates cannot overbook.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::provider::{ProviderError, ProviderResult};

/// Account-wide quota counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuotaKind {
    Cores,
    RamMb,
    Instances,
    Volumes,
    VolumeGigabytes,
    FloatingIps,
    WafPolicies,
    CbrPolicies,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuotaKind::Cores => "cores",
            QuotaKind::RamMb => "ram",
            QuotaKind::Instances => "instances",
            QuotaKind::Volumes => "volumes",
            QuotaKind::VolumeGigabytes => "gigabytes",
            QuotaKind::FloatingIps => "floatingip",
            QuotaKind::WafPolicies => "waf_policies",
            QuotaKind::CbrPolicies => "cbr_policies",
        };
        write!(f, "{}", s)
    }
}

/// A (kind, count) pair to reserve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRequest {
    pub kind: QuotaKind,
    pub count: u64,
}

impl QuotaRequest {
    pub fn new(kind: QuotaKind, count: u64) -> Self {
        Self { kind, count }
    }

    /// CPU and RAM demand of one server of the given flavor, plus the server itself
    pub fn for_flavor(vcpus: u64, ram_mb: u64) -> Vec<QuotaRequest> {
        vec![
            QuotaRequest::new(QuotaKind::Instances, 1),
            QuotaRequest::new(QuotaKind::Cores, vcpus),
            QuotaRequest::new(QuotaKind::RamMb, ram_mb),
        ]
    }
}

/// Observed usage of one quota kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u64,
    /// `None` means unlimited
    pub limit: Option<u64>,
}

impl QuotaUsage {
    pub fn new(used: u64, limit: Option<u64>) -> Self {
        Self { used, limit }
    }
}

/// Where the booker reads current usage and limits from
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn usage(&self, kind: QuotaKind) -> ProviderResult<QuotaUsage>;
}

/// Usage source with fixed numbers
#[derive(Debug, Default)]
pub struct FixedUsage {
    usage: std::sync::Mutex<HashMap<QuotaKind, QuotaUsage>>,
}

impl FixedUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, kind: QuotaKind, used: u64, limit: u64) -> Self {
        self.set(kind, QuotaUsage::new(used, Some(limit)));
        self
    }

    pub fn set(&self, kind: QuotaKind, usage: QuotaUsage) {
        if let Ok(mut map) = self.usage.lock() {
            map.insert(kind, usage);
        }
    }
}

#[async_trait]
impl UsageSource for FixedUsage {
    async fn usage(&self, kind: QuotaKind) -> ProviderResult<QuotaUsage> {
        let map = self
            .usage
            .lock()
            .map_err(|_| ProviderError::new("quota usage table poisoned"))?;
        Ok(map
            .get(&kind)
            .copied()
            .unwrap_or(QuotaUsage::new(0, None)))
    }
}

/// Handle to a live reservation
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a reservation must be released"]
pub struct ReservationToken(u64);

#[derive(Debug, Default)]
struct Ledger {
    next_token: u64,
    reservations: HashMap<u64, BTreeMap<QuotaKind, u64>>,
}

impl Ledger {
    fn reserved(&self, kind: QuotaKind) -> u64 {
        self.reservations
            .values()
            .filter_map(|r| r.get(&kind))
            .sum()
    }
}

/// Reservation ledger shared by everything that creates resources
pub struct QuotaBooker {
    source: Arc<dyn UsageSource>,
    ledger: Mutex<Ledger>,
}

impl QuotaBooker {
    pub fn new(source: Arc<dyn UsageSource>) -> Self {
        Self {
            source,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Reserve every request or none of them
    ///
    /// Fails with `QuotaExceeded` naming the first kind that would go over its limit.
    pub async fn book(&self, requests: &[QuotaRequest]) -> ProviderResult<ReservationToken> {
        let mut demand: BTreeMap<QuotaKind, u64> = BTreeMap::new();
        for request in requests.iter().filter(|r| r.count > 0) {
            *demand.entry(request.kind).or_default() += request.count;
        }

        let mut ledger = self.ledger.lock().await;
        for (&kind, &count) in &demand {
            let usage = self.source.usage(kind).await?;
            let reserved = ledger.reserved(kind);
            if let Some(limit) = usage.limit
                && usage.used + reserved + count > limit
            {
                return Err(ProviderError::quota_exceeded(format!(
                    "quota '{}' exceeded: requested {}, used {}, reserved {}, limit {}",
                    kind, count, usage.used, reserved, limit
                )));
            }
        }

        ledger.next_token += 1;
        let token = ledger.next_token;
        if !demand.is_empty() {
            log::debug!("booked quota {:?} under token {}", demand, token);
            ledger.reservations.insert(token, demand);
        }
        Ok(ReservationToken(token))
    }

    /// Return the counts booked under `token`
    pub async fn release(&self, token: ReservationToken) {
        let mut ledger = self.ledger.lock().await;
        if ledger.reservations.remove(&token.0).is_some() {
            log::debug!("released quota token {}", token.0);
        }
    }

    /// Live reservations of one kind
    pub async fn reserved(&self, kind: QuotaKind) -> u64 {
        self.ledger.lock().await.reserved(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ErrorKind;

    fn booker(source: FixedUsage) -> QuotaBooker {
        QuotaBooker::new(Arc::new(source))
    }

    #[tokio::test]
    async fn books_within_limit_and_releases() {
        let booker = booker(FixedUsage::new().with(QuotaKind::FloatingIps, 1, 3));
        let token = booker
            .book(&[QuotaRequest::new(QuotaKind::FloatingIps, 2)])
            .await
            .unwrap();
        assert_eq!(booker.reserved(QuotaKind::FloatingIps).await, 2);
        booker.release(token).await;
        assert_eq!(booker.reserved(QuotaKind::FloatingIps).await, 0);
    }

    #[tokio::test]
    async fn live_reservations_count_against_the_limit() {
        let booker = booker(FixedUsage::new().with(QuotaKind::Instances, 0, 1));
        let _first = booker
            .book(&[QuotaRequest::new(QuotaKind::Instances, 1)])
            .await
            .unwrap();
        let err = booker
            .book(&[QuotaRequest::new(QuotaKind::Instances, 1)])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert!(err.message.contains("instances"));
    }

    #[tokio::test]
    async fn failed_booking_records_nothing() {
        let booker = booker(
            FixedUsage::new()
                .with(QuotaKind::Cores, 0, 8)
                .with(QuotaKind::RamMb, 0, 4096),
        );
        let err = booker
            .book(&QuotaRequest::for_flavor(2, 8192))
            .await
            .unwrap_err();
        assert!(err.message.contains("ram"));
        assert_eq!(booker.reserved(QuotaKind::Cores).await, 0);
        assert_eq!(booker.reserved(QuotaKind::Instances).await, 0);
    }

    #[tokio::test]
    async fn unlimited_kinds_always_book() {
        let booker = booker(FixedUsage::new());
        let token = booker
            .book(&[QuotaRequest::new(QuotaKind::Volumes, 1000)])
            .await
            .unwrap();
        booker.release(token).await;
    }

    #[tokio::test]
    async fn concurrent_over_demand_fails_at_least_once() {
        let booker = Arc::new(booker(FixedUsage::new().with(QuotaKind::FloatingIps, 0, 2)));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let booker = booker.clone();
            handles.push(tokio::spawn(async move {
                booker
                    .book(&[QuotaRequest::new(QuotaKind::FloatingIps, 1)])
                    .await
            }));
        }
        let mut failures = 0;
        for handle in handles {
            if handle.await.unwrap().is_err() {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
        assert_eq!(booker.reserved(QuotaKind::FloatingIps).await, 2);
    }
}
