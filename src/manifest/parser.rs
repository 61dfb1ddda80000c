//! Declared package references from project manifests.
//!
//! Both dialects are XML. `packages.config` lists `<package id=".." version=".."/>`
//! elements; SDK-style projects list `<PackageReference Include=".." Version=".."/>`
//! items, where the version may also be a nested `<Version>` element. Element
//! positions are recorded as 1-based line and column of the element name,
//! the convention MSBuild and Visual Studio use for clickable diagnostics.

use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

use super::{ManifestKind, ProjectManifest};
use crate::checker::NuGetVersion;
use crate::error::{Result, ScanError};
use crate::model::{Diagnostic, Package, PackageSet, SourceLocation};

const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `packages.config`
    PackagesConfig,
    /// `PackageReference` items in a project file
    PackageReference,
}

impl Dialect {
    fn is_reference(&self, local_name: &[u8]) -> bool {
        match self {
            Dialect::PackagesConfig => local_name == b"package",
            Dialect::PackageReference => local_name.eq_ignore_ascii_case(b"PackageReference"),
        }
    }

    fn id_attributes(&self) -> &'static [&'static [u8]] {
        match self {
            Dialect::PackagesConfig => &[b"id"],
            Dialect::PackageReference => &[b"Include", b"Update"],
        }
    }
}

/// References read from one manifest.
#[derive(Debug, Clone, Default)]
pub struct ParsedManifest {
    pub packages: PackageSet,
    /// One warning per reference that was dropped.
    pub diagnostics: Vec<Diagnostic>,
}

/// Reads the declared references of a classified manifest.
///
/// Solutions declare no packages themselves and yield an empty result.
pub fn parse_manifest(manifest: &ProjectManifest) -> Result<ParsedManifest> {
    let dialect = match manifest.kind() {
        ManifestKind::PackagesConfig => Dialect::PackagesConfig,
        ManifestKind::PackageReference => Dialect::PackageReference,
        ManifestKind::Solution => return Ok(ParsedManifest::default()),
    };

    let path = manifest.path();
    let content = fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
    parse_str(&content, dialect, path)
}

/// Parses manifest text. `file` is only used for errors and diagnostics.
pub fn parse_str(content: &str, dialect: Dialect, file: &Path) -> Result<ParsedManifest> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let lines = LineIndex::new(content);
    let mut reader = Reader::from_str(content);
    let mut state = ParseState::new(dialect, file);

    let parse_error = |reason: String| ScanError::ManifestParse {
        path: file.to_path_buf(),
        reason,
    };

    loop {
        let event = reader.read_event().map_err(|e| {
            parse_error(format!("{e} at byte {}", reader.error_position()))
        })?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                state.depth += 1;
                let location = lines.element_location(end);
                state.open(&e, location, false).map_err(parse_error)?;
            }
            Event::Empty(e) => {
                state.depth += 1;
                let location = lines.element_location(end);
                state.open(&e, location, true).map_err(parse_error)?;
                state.close();
            }
            Event::End(_) => state.close(),
            Event::Text(t) => {
                if state.capturing.is_some() {
                    let raw = reader
                        .decoder()
                        .decode(&t)
                        .map_err(|e| parse_error(e.to_string()))?;
                    let text = quick_xml::escape::unescape(&raw)
                        .map_err(|e| parse_error(e.to_string()))?;
                    state.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if state.capturing.is_some() {
                    state.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(state.finish())
}

struct PendingReference {
    id: Option<String>,
    version: Option<String>,
    nested_version: Option<String>,
    location: SourceLocation,
    depth: usize,
}

struct ParseState<'a> {
    dialect: Dialect,
    file: &'a Path,
    depth: usize,
    pending: Option<PendingReference>,
    /// Depth of the `<Version>` element whose text is being collected.
    capturing: Option<usize>,
    text: String,
    parsed: ParsedManifest,
}

impl<'a> ParseState<'a> {
    fn new(dialect: Dialect, file: &'a Path) -> Self {
        Self {
            dialect,
            file,
            depth: 0,
            pending: None,
            capturing: None,
            text: String::new(),
            parsed: ParsedManifest::default(),
        }
    }

    fn open(
        &mut self,
        element: &BytesStart<'_>,
        location: SourceLocation,
        empty: bool,
    ) -> std::result::Result<(), String> {
        let local_name = element.local_name();
        let local_name = local_name.as_ref();

        if self.pending.is_none() {
            if self.dialect.is_reference(local_name) {
                let (id, version) = read_attributes(self.dialect, element)?;
                self.pending = Some(PendingReference {
                    id,
                    version,
                    nested_version: None,
                    location,
                    depth: self.depth,
                });
            }
            return Ok(());
        }

        if local_name != b"Version" || self.capturing.is_some() {
            return Ok(());
        }
        if let Some(pending) = self.pending.as_mut().filter(|p| p.nested_version.is_none()) {
            if empty {
                pending.nested_version = Some(String::new());
            } else {
                self.capturing = Some(self.depth);
                self.text.clear();
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.capturing == Some(self.depth) {
            self.capturing = None;
            if let Some(pending) = &mut self.pending {
                pending.nested_version = Some(std::mem::take(&mut self.text));
            }
        }

        if self.pending.as_ref().is_some_and(|p| p.depth == self.depth) {
            if let Some(pending) = self.pending.take() {
                self.add(pending);
            }
        }

        self.depth = self.depth.saturating_sub(1);
    }

    fn add(&mut self, reference: PendingReference) {
        let at = reference.location;
        let location = Some(at);

        let Some(id) = reference.id else {
            warn!(file = %self.file.display(), location = %at, "package reference without id ignored");
            self.parsed.diagnostics.push(
                Diagnostic::warning("Package reference has no id and is being ignored.")
                    .in_file(self.file)
                    .at(location),
            );
            return;
        };

        let version = reference
            .version
            .or(reference.nested_version)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let Some(version) = version else {
            warn!(file = %self.file.display(), location = %at, package = %id, "no version found, ignoring package");
            self.parsed.diagnostics.push(
                Diagnostic::warning(format!(
                    "Unable to find a version for package '{id}'. It will be ignored."
                ))
                .in_file(self.file)
                .at(location),
            );
            return;
        };

        if let Err(e) = NuGetVersion::parse(&version) {
            warn!(file = %self.file.display(), location = %at, package = %id, error = %e, "invalid version, ignoring package");
            self.parsed.diagnostics.push(
                Diagnostic::warning(format!(
                    "{version} is not a valid NuGet version for package '{id}' and is being ignored. \
                     See https://learn.microsoft.com/nuget/concepts/package-versioning for valid versions."
                ))
                .in_file(self.file)
                .at(location),
            );
            return;
        }

        self.parsed
            .packages
            .insert(Package::new(id, version).with_location(reference.location));
    }

    fn finish(self) -> ParsedManifest {
        self.parsed
    }
}

fn read_attributes(
    dialect: Dialect,
    element: &BytesStart<'_>,
) -> std::result::Result<(Option<String>, Option<String>), String> {
    let mut ids: Vec<(usize, String)> = Vec::new();
    let mut version = None;

    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = attr.key.local_name();
        let key = key.as_ref();

        if key.eq_ignore_ascii_case(b"version") {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            version = Some(value.into_owned());
        } else if let Some(rank) = dialect
            .id_attributes()
            .iter()
            .position(|name| key.eq_ignore_ascii_case(name))
        {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            ids.push((rank, value.into_owned()));
        }
    }

    ids.sort_by_key(|(rank, _)| *rank);
    let id = ids
        .into_iter()
        .map(|(_, id)| id.trim().to_string())
        .find(|id| !id.is_empty());
    Ok((id, version))
}

/// Maps byte offsets to 1-based line and column.
struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, starts }
    }

    fn locate(&self, offset: usize) -> SourceLocation {
        let offset = offset.min(self.text.len());
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let start = self.starts[line];
        let column = self
            .text
            .get(start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(0);
        SourceLocation::new(line as u32 + 1, column as u32 + 1)
    }

    /// Location of the name of the element whose tag ends right before `end`.
    fn element_location(&self, end: usize) -> SourceLocation {
        let end = end.min(self.text.len());
        let open = self.text[..end].rfind('<').unwrap_or(0);
        self.locate(open + 1)
    }
}
