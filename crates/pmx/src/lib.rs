//! 🏠 pmx: moves a property-management app's records from a document store into a
//! partitioned store. Export, transform, import. Landlords, tenants, viewings, agencies.
//!
//! 🧭 Start at [`supervisors::Supervisor`] for the pipeline, [`app_config`] for how it's
//! configured, and [`catalog`] for what each collection is allowed to look like.

pub mod app_config;
pub mod artifacts;
pub mod backends;
pub mod catalog;
pub mod common;
pub mod error;
pub mod export;
pub mod import;
pub mod progress;
pub mod report;
pub mod retry;
pub mod supervisors;
pub mod transforms;

use anyhow::{Context, Result};

pub use app_config::{AppConfig, load_config};
pub use import::CancelFlag;
pub use report::MigrationReport;
pub use supervisors::{MigrationStage, Supervisor};

/// 🚀 Build the stores from config and run every configured collection.
pub async fn run(
    app_config: &AppConfig,
    cancel: CancelFlag,
    resume_after: Option<String>,
) -> Result<MigrationReport> {
    let supervisor = Supervisor::from_app_config(app_config)
        .await
        .context("💀 Failed to wire up the supervisor")?
        .with_cancel_flag(cancel)
        .with_resume_after(resume_after);
    supervisor
        .run_migration()
        .await
        .context("💀 The migration run could not start")
}
