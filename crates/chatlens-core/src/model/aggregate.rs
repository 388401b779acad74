use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::message::Role;

/// One row of `macro_monthly_domain_shares.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyShareRow {
    pub year_month: String,
    pub role: Role,
    pub macro_domain: usize,
    pub n_messages: u64,
    pub share: f64,
}

/// One row of `macro_weekly_domain_shares.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyShareRow {
    pub year_week: String,
    pub role: Role,
    pub macro_domain: usize,
    pub n_messages: u64,
    pub share: f64,
}

/// Per-period, per-role macro-domain counts.
///
/// Periods are ordered lexically, which is chronological for both the
/// `YYYY-MM` and `YYYY-Www` bucket formats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShareTable {
    n_domains: usize,
    counts: BTreeMap<String, BTreeMap<Role, Vec<u64>>>,
}

impl ShareTable {
    pub fn new(n_domains: usize) -> Self {
        Self {
            n_domains,
            counts: BTreeMap::new(),
        }
    }

    pub fn n_domains(&self) -> usize {
        self.n_domains
    }

    /// Count one message of `role` in `domain` during `period`.
    pub fn add(&mut self, period: &str, role: Role, domain: usize) {
        self.add_count(period, role, domain, 1);
    }

    pub fn add_count(&mut self, period: &str, role: Role, domain: usize, count: u64) {
        if domain >= self.n_domains {
            self.n_domains = domain + 1;
            for roles in self.counts.values_mut() {
                for v in roles.values_mut() {
                    v.resize(self.n_domains, 0);
                }
            }
        }
        let n = self.n_domains;
        let slot = self
            .counts
            .entry(period.to_string())
            .or_default()
            .entry(role)
            .or_insert_with(|| vec![0; n]);
        slot[domain] += count;
    }

    /// Rebuild counts from persisted monthly share rows.
    pub fn from_monthly_rows(rows: &[MonthlyShareRow], n_domains: usize) -> Self {
        let mut table = Self::new(n_domains);
        for r in rows {
            table.add_count(&r.year_month, r.role, r.macro_domain, r.n_messages);
        }
        table
    }

    /// Rebuild counts from persisted weekly share rows.
    pub fn from_weekly_rows(rows: &[WeeklyShareRow], n_domains: usize) -> Self {
        let mut table = Self::new(n_domains);
        for r in rows {
            table.add_count(&r.year_week, r.role, r.macro_domain, r.n_messages);
        }
        table
    }

    pub fn periods(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    /// Periods in which both roles have at least one message.
    pub fn shared_periods(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|(_, roles)| Role::ALL.iter().all(|r| total(roles.get(r)) > 0))
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn total(&self, period: &str, role: Role) -> u64 {
        total(self.counts.get(period).and_then(|roles| roles.get(&role)))
    }

    pub fn counts(&self, period: &str, role: Role) -> Option<&[u64]> {
        self.counts
            .get(period)
            .and_then(|roles| roles.get(&role))
            .map(Vec::as_slice)
    }

    /// Probability vector over all domains, or `None` when the bucket is empty.
    pub fn shares(&self, period: &str, role: Role) -> Option<Vec<f64>> {
        let counts = self.counts(period, role)?;
        let n: u64 = counts.iter().sum();
        if n == 0 {
            return None;
        }
        let mut shares: Vec<f64> = counts.iter().map(|&c| c as f64 / n as f64).collect();
        shares.resize(self.n_domains, 0.0);
        Some(shares)
    }

    /// Flatten into monthly share rows, omitting zero-count domains.
    pub fn to_monthly_rows(&self) -> Vec<MonthlyShareRow> {
        self.rows()
            .map(|(period, role, domain, n, share)| MonthlyShareRow {
                year_month: period.to_string(),
                role,
                macro_domain: domain,
                n_messages: n,
                share,
            })
            .collect()
    }

    /// Flatten into weekly share rows, omitting zero-count domains.
    pub fn to_weekly_rows(&self) -> Vec<WeeklyShareRow> {
        self.rows()
            .map(|(period, role, domain, n, share)| WeeklyShareRow {
                year_week: period.to_string(),
                role,
                macro_domain: domain,
                n_messages: n,
                share,
            })
            .collect()
    }

    fn rows(&self) -> impl Iterator<Item = (&str, Role, usize, u64, f64)> + '_ {
        self.counts.iter().flat_map(|(period, roles)| {
            roles.iter().flat_map(move |(role, counts)| {
                let n: u64 = counts.iter().sum();
                counts
                    .iter()
                    .enumerate()
                    .filter(move |(_, c)| **c > 0 && n > 0)
                    .map(move |(d, &c)| (period.as_str(), *role, d, c, c as f64 / n as f64))
            })
        })
    }
}

fn total(counts: Option<&Vec<u64>>) -> u64 {
    counts.map(|v| v.iter().sum()).unwrap_or(0)
}
