//! Assemble a [`Package`] from the files named in `strata.toml`.

use std::path::Path;

use strata_migrate::{Package, SeedSet, TableDescriptor, load_descriptors};
use tracing::debug;

use crate::config::{Config, PackageConfig};
use crate::error::{CliError, CliResult};

fn descriptors(config: &Config, path: &Path) -> CliResult<Vec<TableDescriptor>> {
    let path = config.resolve(path);
    if !path.is_file() {
        return Err(CliError::Manifest(format!(
            "descriptor file not found: {}",
            path.display()
        )));
    }
    Ok(load_descriptors(&path)?)
}

fn seeds(config: &Config, level: &str, path: &Path) -> CliResult<SeedSet> {
    let path = config.resolve(path);
    if !path.is_file() {
        return Err(CliError::Manifest(format!(
            "seed file not found: {}",
            path.display()
        )));
    }
    Ok(SeedSet::load(level, &path)?)
}

/// Every table a package declares, its own file first and then its modules.
fn declared_tables(config: &Config, package: &PackageConfig) -> CliResult<Vec<TableDescriptor>> {
    let mut tables = descriptors(config, &package.descriptors)?;
    for module in &package.modules {
        if let Some(path) = &module.descriptors {
            tables.extend(descriptors(config, path)?);
        }
    }
    Ok(tables)
}

/// Build the package named `name`. Tables of packages earlier in the chain
/// are attached as upstream so seeds can target them.
pub fn build(config: &Config, name: &str) -> CliResult<Package> {
    let index = config.package_index(name)?;
    let selected = &config.packages[index];

    let mut package = Package::new(&selected.name).descriptors(declared_tables(config, selected)?);

    for earlier in &config.packages[..index] {
        package = package.upstream(declared_tables(config, earlier)?);
    }

    if let Some(path) = &selected.seeds {
        package = package.level(seeds(config, selected.level(), path)?);
    }
    for module in &selected.modules {
        if let Some(path) = &module.seeds {
            package = package.level(seeds(config, &module.name, path)?);
        }
    }

    debug!(
        package = %package.name,
        tables = package.descriptors.len(),
        upstream = package.upstream.len(),
        levels = package.levels.len(),
        "Assembled package"
    );
    Ok(package)
}
