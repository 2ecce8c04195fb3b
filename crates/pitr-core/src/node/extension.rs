//! Lifecycle of the binlog UDF component
//!
//! Several collector and recoverer instances may start against the same
//! cluster at once, so install and uninstall check the current state first
//! and turn into a logged no-op when there is nothing to do.

use crate::Result;
use async_trait::async_trait;

/// URN of the component providing `get_gtid_set_by_binlog` and the
/// first/last record timestamp functions
pub const BINLOG_UDF_COMPONENT: &str = "file://component_binlog_utils_udf";

/// Raw component operations of a node
#[async_trait]
pub trait ExtensionInstaller: Send {
    /// Whether the component is registered
    async fn extension_installed(&mut self) -> Result<bool>;

    /// Register the component
    async fn install_extension(&mut self) -> Result<()>;

    /// Unregister the component
    async fn uninstall_extension(&mut self) -> Result<()>;
}

/// Install the component if it is missing
pub async fn ensure_installed<I>(installer: &mut I) -> Result<()>
where
    I: ExtensionInstaller + ?Sized,
{
    if installer.extension_installed().await? {
        tracing::info!("{} is already installed", BINLOG_UDF_COMPONENT);
        return Ok(());
    }
    installer.install_extension().await?;
    tracing::info!("installed {}", BINLOG_UDF_COMPONENT);
    Ok(())
}

/// Uninstall the component if it is present
pub async fn ensure_uninstalled<I>(installer: &mut I) -> Result<()>
where
    I: ExtensionInstaller + ?Sized,
{
    if !installer.extension_installed().await? {
        tracing::info!("{} is already uninstalled", BINLOG_UDF_COMPONENT);
        return Ok(());
    }
    installer.uninstall_extension().await?;
    tracing::info!("uninstalled {}", BINLOG_UDF_COMPONENT);
    Ok(())
}
