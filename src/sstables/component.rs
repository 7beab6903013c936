//! STRATA - SSTable Components
//! The closed vocabulary of files that make up one table instance, the
//! version/format tags that name them, and the rules for which sets of
//! components form a complete instance.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// On-disk format version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionType {
    Ka,
    La,
    Mc,
}

impl VersionType {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionType::Ka => "ka",
            VersionType::La => "la",
            VersionType::Mc => "mc",
        }
    }
}

impl FromStr for VersionType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ka" => Ok(VersionType::Ka),
            "la" => Ok(VersionType::La),
            "mc" => Ok(VersionType::Mc),
            other => Err(StrataError::MalformedSstable(format!(
                "unknown sstable version '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage format type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    Big,
}

impl FormatType {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatType::Big => "big",
        }
    }
}

impl FromStr for FormatType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "big" => Ok(FormatType::Big),
            other => Err(StrataError::MalformedSstable(format!(
                "unknown sstable format '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One kind of file belonging to a table instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentType {
    Index,
    CompressionInfo,
    Data,
    Toc,
    Summary,
    Digest,
    Crc,
    Filter,
    Statistics,
    TemporaryToc,
    TemporaryStatistics,
    Scylla,
}

impl ComponentType {
    pub const ALL: [ComponentType; 12] = [
        ComponentType::Index,
        ComponentType::CompressionInfo,
        ComponentType::Data,
        ComponentType::Toc,
        ComponentType::Summary,
        ComponentType::Digest,
        ComponentType::Crc,
        ComponentType::Filter,
        ComponentType::Statistics,
        ComponentType::TemporaryToc,
        ComponentType::TemporaryStatistics,
        ComponentType::Scylla,
    ];

    /// File-name suffix of this component for `version`.
    pub fn file_name(self, version: VersionType) -> &'static str {
        match self {
            ComponentType::Index => "Index.db",
            ComponentType::CompressionInfo => "CompressionInfo.db",
            ComponentType::Data => "Data.db",
            ComponentType::Toc => "TOC.txt",
            ComponentType::Summary => "Summary.db",
            ComponentType::Digest => match version {
                VersionType::Ka => "Digest.sha1",
                VersionType::La | VersionType::Mc => "Digest.crc32",
            },
            ComponentType::Crc => "CRC.db",
            ComponentType::Filter => "Filter.db",
            ComponentType::Statistics => "Statistics.db",
            ComponentType::TemporaryToc => "TOC.txt.tmp",
            ComponentType::TemporaryStatistics => "Statistics.db.tmp",
            ComponentType::Scylla => "Scylla.db",
        }
    }

    /// Inverse of [`ComponentType::file_name`] for `version`.
    pub fn from_file_name(name: &str, version: VersionType) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.file_name(version) == name)
    }

    /// Components that only exist while an instance is being written or rewritten.
    pub fn is_temporary(self) -> bool {
        matches!(
            self,
            ComponentType::TemporaryToc | ComponentType::TemporaryStatistics
        )
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentType::Index => "Index",
            ComponentType::CompressionInfo => "CompressionInfo",
            ComponentType::Data => "Data",
            ComponentType::Toc => "TOC",
            ComponentType::Summary => "Summary",
            ComponentType::Digest => "Digest",
            ComponentType::Crc => "CRC",
            ComponentType::Filter => "Filter",
            ComponentType::Statistics => "Statistics",
            ComponentType::TemporaryToc => "TemporaryTOC",
            ComponentType::TemporaryStatistics => "TemporaryStatistics",
            ComponentType::Scylla => "Scylla",
        };
        f.write_str(name)
    }
}

/// Components a sealed instance of `version` must have.
///
/// Compressed instances carry CompressionInfo, uncompressed ones carry CRC.
pub fn required_components(version: VersionType, compressed: bool) -> BTreeSet<ComponentType> {
    let mut set: BTreeSet<ComponentType> = match version {
        VersionType::Ka | VersionType::La | VersionType::Mc => [
            ComponentType::Toc,
            ComponentType::Data,
            ComponentType::Index,
            ComponentType::Summary,
            ComponentType::Filter,
            ComponentType::Statistics,
            ComponentType::Digest,
        ]
        .into_iter()
        .collect(),
    };
    set.insert(if compressed {
        ComponentType::CompressionInfo
    } else {
        ComponentType::Crc
    });
    set
}

/// Components a sealed instance of `version` may have in addition.
pub fn optional_components(version: VersionType) -> &'static [ComponentType] {
    match version {
        VersionType::Ka => &[],
        VersionType::La | VersionType::Mc => &[ComponentType::Scylla],
    }
}

fn join(components: &BTreeSet<ComponentType>) -> String {
    components
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check that `components` is exactly a complete set for `version`.
///
/// Both missing required components and unexpected extra ones are errors.
pub fn validate_component_set(
    generation: u64,
    version: VersionType,
    components: &BTreeSet<ComponentType>,
) -> Result<()> {
    let compressed = components.contains(&ComponentType::CompressionInfo);
    let required = required_components(version, compressed);
    let optional = optional_components(version);

    let missing: BTreeSet<_> = required.difference(components).copied().collect();
    let unexpected: BTreeSet<_> = components
        .iter()
        .filter(|c| !required.contains(*c) && !optional.contains(*c))
        .copied()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }

    let mut reasons = Vec::new();
    if !missing.is_empty() {
        reasons.push(format!("missing required components: {}", join(&missing)));
    }
    if !unexpected.is_empty() {
        reasons.push(format!("unexpected components: {}", join(&unexpected)));
    }
    Err(StrataError::ComponentIntegrity {
        generation,
        reason: reasons.join("; "),
    })
}

/// Render a TOC: one component file name per line.
pub fn encode_toc(version: VersionType, components: &BTreeSet<ComponentType>) -> String {
    let mut toc = String::new();
    for component in components {
        toc.push_str(component.file_name(version));
        toc.push('\n');
    }
    toc
}

/// Parse a TOC written by [`encode_toc`].
pub fn parse_toc(
    generation: u64,
    version: VersionType,
    contents: &str,
) -> Result<BTreeSet<ComponentType>> {
    let mut components = BTreeSet::new();
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let component = ComponentType::from_file_name(line, version).ok_or_else(|| {
            StrataError::ComponentIntegrity {
                generation,
                reason: format!("unrecognized TOC component '{}'", line),
            }
        })?;
        components.insert(component);
    }
    if components.is_empty() {
        return Err(StrataError::ComponentIntegrity {
            generation,
            reason: "empty TOC".to_string(),
        });
    }
    Ok(components)
}
