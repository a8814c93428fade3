//! Pool statistics snapshots.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateStats {
    pub template: String,
    pub warm: usize,
    pub assigned: usize,
    pub expired: usize,
    pub target: usize,
    /// `warm / (warm + assigned)`; 0 when both are 0.
    pub hit_rate: f64,
}

impl TemplateStats {
    pub fn new(template: &str, warm: usize, assigned: usize, expired: usize, target: usize) -> Self {
        Self {
            template: template.to_string(),
            warm,
            assigned,
            expired,
            target,
            hit_rate: ratio(warm as u64, (warm + assigned) as u64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub region: String,
    pub templates: Vec<TemplateStats>,
    pub acquisitions: u64,
    pub warm_hits: u64,
    pub cold_starts: u64,
    pub average_latency_ms: f64,
    /// `cold_starts / acquisitions`; 0 before the first acquisition.
    pub cold_start_rate: f64,
}

impl PoolStats {
    pub fn new(
        region: &str,
        templates: Vec<TemplateStats>,
        acquisitions: u64,
        warm_hits: u64,
        cold_starts: u64,
        total_latency_ms: u64,
    ) -> Self {
        // A failed cold start counts as an acquisition but hands nothing out,
        // so the latency average is over completed acquisitions only.
        let completed = warm_hits + cold_starts;
        Self {
            region: region.to_string(),
            templates,
            acquisitions,
            warm_hits,
            cold_starts,
            average_latency_ms: ratio(total_latency_ms, completed),
            cold_start_rate: ratio(cold_starts, acquisitions),
        }
    }

    pub fn template(&self, name: &str) -> Option<&TemplateStats> {
        self.templates.iter().find(|t| t.template == name)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_with_empty_pool() {
        let stats = PoolStats::new("us", vec![TemplateStats::new("base", 0, 0, 0, 4)], 0, 0, 0, 0);
        assert_eq!(stats.cold_start_rate, 0.0);
        assert_eq!(stats.average_latency_ms, 0.0);
        assert_eq!(stats.template("base").unwrap().hit_rate, 0.0);
    }

    #[test]
    fn test_rates() {
        let stats = PoolStats::new("us", vec![TemplateStats::new("base", 3, 1, 2, 4)], 4, 3, 1, 40);
        assert_eq!(stats.cold_start_rate, 0.25);
        assert_eq!(stats.average_latency_ms, 10.0);
        assert_eq!(stats.template("base").unwrap().hit_rate, 0.75);
        assert!(stats.template("node").is_none());
    }
}
