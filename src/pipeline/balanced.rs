//! Balanced generation pipeline.
//!
//! Pipeline flow:
//! Themes + QuotaTable → DraftItems → RecordGenerator → validation → store
//!
//! Every drawn allocation is either consumed by a persisted record or
//! restored to the quota table, so `remaining + outstanding` stays equal to
//! the quota total throughout a run.

use crate::generation::{RecordGenerator, validate_record};
use crate::models::{
    DraftItem, GenerationConfig, PrefgenError, Record, Result, RunStats, Theme,
};
use crate::quota::{Allocation, MetadataSchema, QuotaTable};
use crate::store::append_records;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Knobs of a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub total_records: usize,
    pub batch_size: usize,
    pub retry_budget: usize,
    pub max_item_attempts: usize,
}

impl From<&GenerationConfig> for PipelineSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            total_records: config.total_records,
            batch_size: config.batch_size,
            retry_budget: config.retry_budget,
            max_item_attempts: config.max_item_attempts,
        }
    }
}

/// An item waiting for a (re)try.
#[derive(Debug, Clone, Copy)]
struct Pending {
    theme: usize,
    failures: usize,
}

/// Generates records whose metadata follows the quota table.
pub struct BalancedGenerator<G> {
    generator: G,
    schema: MetadataSchema,
    themes: Vec<Theme>,
    quota: QuotaTable,
    settings: PipelineSettings,
    rng: StdRng,
    next_theme: usize,
    requeue: VecDeque<Pending>,
    show_progress: bool,
}

impl<G: RecordGenerator> BalancedGenerator<G> {
    /// Create a pipeline with a fresh quota table of `quota_total` per category.
    pub fn new(
        generator: G,
        schema: MetadataSchema,
        themes: Vec<Theme>,
        settings: PipelineSettings,
        quota_total: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        if themes.is_empty() {
            return Err(PrefgenError::Configuration("no themes loaded".to_string()));
        }
        if settings.batch_size == 0 || settings.max_item_attempts == 0 {
            return Err(PrefgenError::Configuration(
                "batch_size and max_item_attempts must be > 0".to_string(),
            ));
        }
        let quota = QuotaTable::initialize(&schema, quota_total)?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        Ok(Self {
            generator,
            schema,
            themes,
            quota,
            settings,
            rng,
            next_theme: 0,
            requeue: VecDeque::new(),
            show_progress: true,
        })
    }

    /// Create a pipeline from the `[generation]` config section.
    pub fn from_config(
        generator: G,
        schema: MetadataSchema,
        themes: Vec<Theme>,
        config: &GenerationConfig,
    ) -> Result<Self> {
        Self::new(
            generator,
            schema,
            themes,
            PipelineSettings::from(config),
            config.quota_total(),
            config.seed,
        )
    }

    /// Hide the progress bar (tests, non-interactive runs).
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn quota(&self) -> &QuotaTable {
        &self.quota
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Run until the target is reached or the retry budget is spent,
    /// appending accepted records to `output`.
    pub async fn run(&mut self, output: &Path) -> Result<RunStats> {
        let start = Instant::now();
        let target = self.settings.total_records;
        let mut stats = RunStats {
            target_records: target,
            ..Default::default()
        };
        let mut budget = self.settings.retry_budget;

        info!(
            target,
            batch_size = self.settings.batch_size,
            themes = self.themes.len(),
            categories = self.schema.len(),
            retry_budget = budget,
            output = %output.display(),
            "Starting balanced generation"
        );

        let pb = if self.show_progress {
            ProgressBar::new(target as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .map_err(|e| PrefgenError::Internal(format!("progress template: {e}")))?
                .progress_chars("##-"),
        );

        while stats.accepted < target && budget > 0 {
            let slots = self.settings.batch_size.min(target - stats.accepted);
            let (items, pending) = self.build_batch(slots)?;
            stats.batches += 1;

            debug!(batch = stats.batches, items = items.len(), "Submitting batch");

            let results = match self.generator.generate_batch(&items).await {
                Ok(results) => results,
                Err(e) => {
                    self.restore_all(&items, &mut stats)?;
                    if !e.is_recoverable() {
                        pb.abandon_with_message("aborted");
                        return Err(e);
                    }
                    warn!(batch = stats.batches, error = %e, "Batch generation failed");
                    stats.generation_failures += 1;
                    for p in pending {
                        self.requeue_failed(p, &mut stats);
                    }
                    budget -= 1;
                    pb.set_message(format!("budget {budget}"));
                    continue;
                }
            };

            if results.len() != items.len() {
                debug!(
                    expected = items.len(),
                    received = results.len(),
                    "Generator returned a different number of records"
                );
            }

            let mut accepted: Vec<Record> = Vec::new();
            let mut failed = 0;
            for (pos, (item, p)) in items.iter().zip(pending).enumerate() {
                let outcome = match results.get(pos) {
                    Some(value) => validate_record(value, item, &self.schema),
                    None => Err(PrefgenError::ValidationFailure {
                        item_id: item.id.clone(),
                        reason: "no record returned".to_string(),
                    }),
                };
                match outcome {
                    Ok(record) => accepted.push(record),
                    Err(e) => {
                        debug!(item = %item.id, error = %e, "Record rejected");
                        stats.validation_failures += 1;
                        failed += 1;
                        self.restore(&item.metadata, &mut stats)?;
                        self.requeue_failed(p, &mut stats);
                    }
                }
            }

            if !accepted.is_empty() {
                if let Err(e) = append_records(output, &accepted) {
                    for record in &accepted {
                        let allocation = Allocation::try_from(record.metadata.clone())
                            .map_err(PrefgenError::Internal)?;
                        self.restore(&allocation, &mut stats)?;
                    }
                    pb.abandon_with_message("store write failed");
                    return Err(e);
                }
                stats.accepted += accepted.len();
                pb.inc(accepted.len() as u64);
            }

            if failed > 0 {
                budget -= 1;
                warn!(
                    batch = stats.batches,
                    failed,
                    retry_budget = budget,
                    "Records failed validation, requeued"
                );
            }

            info!(
                batch = stats.batches,
                accepted = stats.accepted,
                target,
                "Batch complete"
            );
            pb.set_message(format!("budget {budget}"));
        }

        pb.finish_with_message("done");

        stats.retry_budget_left = budget;
        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.quota = self.quota.snapshot();
        stats.finalize();

        if stats.is_complete() {
            info!(accepted = stats.accepted, "Generation complete");
        } else {
            warn!(
                accepted = stats.accepted,
                target,
                "Retry budget exhausted before reaching target"
            );
        }

        Ok(stats)
    }

    /// Draw allocations for up to `slots` items, requeued items first.
    ///
    /// On `QuotaExhausted` the allocations already drawn for this batch
    /// are restored before the error is returned.
    fn build_batch(&mut self, slots: usize) -> Result<(Vec<DraftItem>, Vec<Pending>)> {
        let mut items: Vec<DraftItem> = Vec::with_capacity(slots);
        let mut pending = Vec::with_capacity(slots);

        while items.len() < slots {
            let p = self.requeue.pop_front().unwrap_or_else(|| {
                let p = Pending {
                    theme: self.next_theme % self.themes.len(),
                    failures: 0,
                };
                self.next_theme += 1;
                p
            });

            let allocation = match self.quota.draw(&mut self.rng) {
                Ok(a) => a,
                Err(e) => {
                    self.requeue.push_front(p);
                    for item in &items {
                        self.quota.restore(&item.metadata)?;
                    }
                    return Err(e);
                }
            };

            let id = uuid::Uuid::new_v4().to_string();
            items.push(DraftItem::new(id, &self.themes[p.theme], allocation));
            pending.push(p);
        }

        Ok((items, pending))
    }

    fn restore(&mut self, allocation: &Allocation, stats: &mut RunStats) -> Result<()> {
        self.quota.restore(allocation)?;
        stats.restored_allocations += 1;
        Ok(())
    }

    fn restore_all(&mut self, items: &[DraftItem], stats: &mut RunStats) -> Result<()> {
        for item in items {
            self.restore(&item.metadata, stats)?;
        }
        Ok(())
    }

    fn requeue_failed(&mut self, mut p: Pending, stats: &mut RunStats) {
        p.failures += 1;
        if p.failures >= self.settings.max_item_attempts {
            stats.dropped_items += 1;
            warn!(
                theme = %self.themes[p.theme].theme,
                attempts = p.failures,
                "Dropping item after repeated failures"
            );
        } else {
            self.requeue.push_back(p);
        }
    }
}
