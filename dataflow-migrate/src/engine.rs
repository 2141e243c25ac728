//! The auto-migration orchestrator.
//!
//! [`AutoMigrationSystem`] drives the full pipeline: inspect the live
//! database, compare against the declared models, generate a migration,
//! then lock, execute, and record it. Progress is modeled as an explicit
//! phase machine so callers can observe where a run stopped.

use dataflow_schema::{DatabaseSchema, SchemaCache};
use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::diff::SchemaComparator;
use crate::error::{MigrateResult, MigrationError};
use crate::executor::DdlExecutor;
use crate::introspect::SchemaInspector;
use crate::lock::MigrationLockManager;
use crate::migration::{Migration, MigrationGenerator};

/// Where a migration run currently is.
///
/// `Failed` is reachable from every phase; a successful run ends in `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// No run in progress.
    Idle,
    /// Taking the live schema snapshot.
    Inspecting,
    /// Diffing models against the snapshot.
    Comparing,
    /// Producing the migration.
    Generating,
    /// Waiting for the cross-process lock.
    Locking,
    /// Applying DDL.
    Executing,
    /// Finished successfully.
    Done,
    /// Aborted with an error.
    Failed,
}

/// Options for one `auto_migrate` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Stop after generating; never lock or execute.
    pub dry_run: bool,
    /// Skip interactive confirmation.
    pub auto_confirm: bool,
    /// Ask for confirmation before executing (unless `auto_confirm`).
    pub interactive: bool,
}

impl MigrateOptions {
    /// Create default options: apply immediately, no prompting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable auto-confirmation.
    pub fn auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    /// Enable interactive confirmation.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

/// Result of one `auto_migrate` call.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// Whether the run completed without error.
    pub success: bool,
    /// The generated migrations. Empty when the schemas already match;
    /// exactly one entry otherwise (dry-run included).
    pub migrations: Vec<Migration>,
    /// DDL statements actually executed.
    pub statements_executed: usize,
    /// Whether execution was skipped by the checksum ledger.
    pub skipped_checksum: bool,
}

impl MigrationOutcome {
    fn up_to_date() -> Self {
        Self {
            success: true,
            migrations: Vec::new(),
            statements_executed: 0,
            skipped_checksum: false,
        }
    }

    /// Get a short human-readable summary.
    pub fn summary(&self) -> String {
        if self.migrations.is_empty() {
            "schema up to date".to_string()
        } else if self.skipped_checksum {
            "migration already applied elsewhere, skipped".to_string()
        } else if self.statements_executed == 0 {
            format!("{} migration(s) proposed", self.migrations.len())
        } else {
            format!(
                "{} migration(s) applied, {} statement(s)",
                self.migrations.len(),
                self.statements_executed
            )
        }
    }
}

/// Asks the operator whether a migration may run.
///
/// Injected rather than read from ambient stdin so non-terminal callers
/// and tests can supply their own policy.
pub trait ConfirmationPrompt: Send + Sync {
    /// Return true to proceed with execution.
    fn confirm(&self, migration: &Migration) -> bool;
}

/// Prompt that reads a y/yes line from stdin.
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl ConfirmationPrompt for StdinPrompt {
    fn confirm(&self, migration: &Migration) -> bool {
        use std::io::Write;

        let mut stdout = std::io::stdout();
        let _ = writeln!(stdout, "About to apply {}", migration.summary());
        for operation in &migration.operations {
            let _ = writeln!(stdout, "  - {:?}", operation);
        }
        let _ = write!(stdout, "Proceed? [y/N] ");
        let _ = stdout.flush();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Orchestrates inspection, comparison, generation, locking, and execution.
///
/// All state is instance-scoped: the snapshot cache and the comparator's
/// fingerprint cache live on the system, never in globals.
pub struct AutoMigrationSystem {
    config: MigrationConfig,
    comparator: SchemaComparator,
    cache: SchemaCache,
    prompt: Box<dyn ConfirmationPrompt>,
    phase: MigrationPhase,
}

impl AutoMigrationSystem {
    /// Create a system for a database URL with default configuration.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self::with_config(MigrationConfig::new(database_url))
    }

    /// Create a system from explicit configuration.
    pub fn with_config(config: MigrationConfig) -> Self {
        let comparator = SchemaComparator::new().with_max_schema_size(config.max_schema_size);
        let cache = SchemaCache::new()
            .with_ttl(config.cache_ttl)
            .with_max_size(config.cache_max_size);
        Self {
            config,
            comparator,
            cache,
            prompt: Box::new(StdinPrompt),
            phase: MigrationPhase::Idle,
        }
    }

    /// Replace the confirmation prompt.
    pub fn with_prompt(mut self, prompt: impl ConfirmationPrompt + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    /// The current phase.
    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// The configuration in use.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Inspect, compare, generate, and (unless dry-run) lock and execute.
    ///
    /// Inspection and comparison errors abort before any DDL is attempted.
    /// A lock timeout is surfaced as-is, never silently retried. On any
    /// error the system lands in [`MigrationPhase::Failed`] and the lock,
    /// when held, is released.
    pub fn auto_migrate(
        &mut self,
        model_schema: &DatabaseSchema,
        options: &MigrateOptions,
    ) -> MigrateResult<MigrationOutcome> {
        match self.run(model_schema, options) {
            Ok(outcome) => {
                self.phase = MigrationPhase::Done;
                Ok(outcome)
            }
            Err(e) => {
                self.phase = MigrationPhase::Failed;
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        model_schema: &DatabaseSchema,
        options: &MigrateOptions,
    ) -> MigrateResult<MigrationOutcome> {
        self.phase = MigrationPhase::Inspecting;
        let cache_key = self.config.database_url.clone();
        let db_schema = match self.cache.get_cached_schema(&cache_key) {
            Some(snapshot) => {
                debug!("using cached schema snapshot");
                snapshot
            }
            None => {
                let inspector = SchemaInspector::new(&self.config.database_url)?
                    .exclude_table(self.config.history_table.clone());
                let snapshot = inspector.get_current_schema()?;
                self.cache.insert(&*cache_key, snapshot.clone());
                snapshot
            }
        };

        self.phase = MigrationPhase::Comparing;
        let diff = self.comparator.compare(model_schema, &db_schema)?;

        if self.config.fail_on_incompatible {
            if let Some(alteration) = diff.alter_columns.first() {
                return Err(MigrationError::incompatible(
                    alteration.table.clone(),
                    alteration.column.name.clone(),
                    alteration.column.ty.tag(),
                    alteration.db_type.tag(),
                ));
            }
        }

        self.phase = MigrationPhase::Generating;
        if diff.is_empty() {
            debug!("no schema changes detected");
            return Ok(MigrationOutcome::up_to_date());
        }

        let migration = MigrationGenerator::new()
            .allow_destructive(self.config.allow_destructive)
            .generate(&diff)?;

        if migration.is_empty() {
            // Everything in the diff was destructive and gated off.
            warn!(summary = %diff.summary(), "all detected changes are destructive and disabled");
            return Ok(MigrationOutcome::up_to_date());
        }

        if options.dry_run {
            info!(migration = %migration.summary(), "dry run, not executing");
            return Ok(MigrationOutcome {
                success: true,
                migrations: vec![migration],
                statements_executed: 0,
                skipped_checksum: false,
            });
        }

        if options.interactive && !options.auto_confirm && !self.prompt.confirm(&migration) {
            return Err(MigrationError::ConfirmationDeclined);
        }

        self.phase = MigrationPhase::Locking;
        let lock = MigrationLockManager::new()
            .poll_interval(self.config.lock_poll_interval)
            .acquire(&self.config.database_url, self.config.lock_timeout)?;

        self.phase = MigrationPhase::Executing;
        let executor = DdlExecutor::new(&self.config.database_url)?
            .history_table(self.config.history_table.clone());
        // The lock handle outlives execution and releases on drop, error
        // paths included.
        let result = executor.execute(&migration)?;

        if let Err(e) = lock.release() {
            warn!(error = %e, "migration lock release failed");
        }
        self.cache.invalidate(&cache_key);

        Ok(MigrationOutcome {
            success: true,
            migrations: vec![migration],
            statements_executed: result.statements_executed,
            skipped_checksum: result.skipped,
        })
    }
}
