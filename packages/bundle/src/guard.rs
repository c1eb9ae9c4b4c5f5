//! Capability restriction for Block scripts.
//!
//! Block code is shipped pre-built and expects a handful of host libraries
//! (the UI framework and the host design system) to be provided at runtime.
//! The [`ImportGuard`] rewrites every module reference in a script so it goes
//! through a single host-controlled `require`:
//!
//! - whitelisted names resolve to the host's copy of the library;
//! - every other name resolves to an inert no-op module, and the attempt is
//!   logged.
//!
//! Static imports, re-exports and dynamic `import("...")` all become
//! `require` calls. Exports become `module.exports` assignments, since the
//! script runs inside a function wrapper where `export` is not valid.
//!
//! Unsupported imports never throw. A Block that pulls in an optional
//! dependency the host does not offer keeps rendering instead of crashing on
//! load.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use blockframe_protocol::Bundle;

lazy_static! {
    static ref IMPORT_NAMESPACE: Regex = Regex::new(
        r#"(?m)^([ \t]*)import\s+\*\s+as\s+([A-Za-z_$][\w$]*)\s+from\s+["']([^"']+)["'];?"#
    )
    .unwrap();
    static ref IMPORT_DEFAULT: Regex = Regex::new(
        r#"(?m)^([ \t]*)import\s+([A-Za-z_$][\w$]*)\s*(?:,\s*\{([^}]*)\})?\s*from\s+["']([^"']+)["'];?"#
    )
    .unwrap();
    static ref IMPORT_NAMED: Regex =
        Regex::new(r#"(?m)^([ \t]*)import\s*\{([^}]*)\}\s*from\s+["']([^"']+)["'];?"#).unwrap();
    static ref IMPORT_BARE: Regex =
        Regex::new(r#"(?m)^([ \t]*)import\s+["']([^"']+)["'];?"#).unwrap();
    static ref EXPORT_DEFAULT: Regex = Regex::new(r"(?m)^([ \t]*)export\s+default\s+").unwrap();
    static ref EXPORT_FROM: Regex = Regex::new(
        r#"(?m)^([ \t]*)export\s*\{([^}]*)\}\s*from\s+["']([^"']+)["'];?"#
    )
    .unwrap();
    static ref EXPORT_STAR: Regex = Regex::new(
        r#"(?m)^([ \t]*)export\s*\*\s*(?:as\s+([A-Za-z_$][\w$]*)\s+)?from\s+["']([^"']+)["'];?"#
    )
    .unwrap();
    static ref EXPORT_LIST: Regex = Regex::new(r"(?m)^([ \t]*)export\s*\{([^}]*)\}[ \t]*;?").unwrap();
    static ref EXPORT_DECL: Regex = Regex::new(
        r"(?m)^([ \t]*)export\s+((?:async\s+)?function(?:\s*\*)?\s*|(?:class|const|let|var)\s+)([A-Za-z_$][\w$]*)"
    )
    .unwrap();
    static ref EXPORT_PATTERN: Regex =
        Regex::new(r"(?m)^([ \t]*)export\s+(const|let|var)\s*(\{[^}]*\}|\[[^\]]*\])").unwrap();
    static ref DYNAMIC_IMPORT: Regex =
        Regex::new(r#"(^|[^\w$.])import\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap();
    static ref DYNAMIC_IMPORT_COMPUTED: Regex = Regex::new(r"(^|[^\w$.])import\s*\(").unwrap();
    static ref IDENT: Regex = Regex::new(r"^[A-Za-z_$][\w$]*$").unwrap();
    static ref REQUIRE_CALL: Regex =
        Regex::new(r#"\brequire\(\s*["']([^"']+)["']\s*\)"#).unwrap();
}

/// Libraries a Block may import by default.
pub const DEFAULT_ALLOWED_IMPORTS: &[&str] = &[
    "react",
    "react-dom",
    "react/jsx-runtime",
    "@primer/react",
    "@primer/octicons-react",
];

/// One module reference found in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub specifier: String,
    pub allowed: bool,
}

/// A script after guarding.
#[derive(Debug, Clone)]
pub struct GuardedScript {
    pub source: String,
    pub imports: Vec<ImportRecord>,
}

impl GuardedScript {
    pub fn rejected(&self) -> impl Iterator<Item = &str> {
        self.imports
            .iter()
            .filter(|i| !i.allowed)
            .map(|i| i.specifier.as_str())
    }
}

/// Rewrites Block scripts so they can only reach whitelisted host modules.
#[derive(Debug, Clone)]
pub struct ImportGuard {
    allowed: BTreeSet<String>,
}

impl Default for ImportGuard {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_IMPORTS.iter().copied())
    }
}

impl ImportGuard {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, specifier: &str) -> bool {
        self.allowed.contains(specifier)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(|s| s.as_str())
    }

    /// Guard every script of a bundle. Styles and other files pass through.
    pub fn guard_bundle(&self, bundle: Bundle) -> Bundle {
        let block_id = bundle.block_id;
        let files = bundle
            .files
            .into_iter()
            .map(|mut file| {
                if file.is_script() {
                    let guarded = self.guard_script(&block_id, &file.name, &file.content);
                    file.content = guarded.source;
                }
                file
            })
            .collect();
        Bundle { block_id, files }
    }

    /// Rewrite one script.
    pub fn guard_script(&self, block_id: &str, file_name: &str, source: &str) -> GuardedScript {
        let body = rewrite_imports(source);
        if body.contains("__blockframeImport(") {
            tracing::warn!(
                block = block_id,
                file = file_name,
                "computed dynamic import is checked only when it runs"
            );
        }

        let mut seen = BTreeSet::new();
        let mut imports = Vec::new();
        for caps in REQUIRE_CALL.captures_iter(&body) {
            let specifier = caps[1].to_string();
            if seen.insert(specifier.clone()) {
                let allowed = self.is_allowed(&specifier);
                if !allowed {
                    tracing::warn!(
                        block = block_id,
                        file = file_name,
                        import = %specifier,
                        "unsupported import replaced with a no-op module"
                    );
                }
                imports.push(ImportRecord { specifier, allowed });
            }
        }

        let source = wrap(&body, imports.iter().filter(|i| i.allowed));
        GuardedScript { source, imports }
    }
}

fn rewrite_imports(source: &str) -> String {
    let out = IMPORT_NAMESPACE.replace_all(source, |caps: &Captures| {
        format!("{}const {} = require(\"{}\");", &caps[1], &caps[2], &caps[3])
    });
    let out = IMPORT_DEFAULT.replace_all(&out, |caps: &Captures| {
        let mut line = format!(
            "{}const {} = __blockframeDefault(require(\"{}\"));",
            &caps[1], &caps[2], &caps[4]
        );
        if let Some(named) = caps.get(3) {
            line.push_str(&format!(
                " const {{ {} }} = require(\"{}\");",
                destructure(named.as_str()),
                &caps[4]
            ));
        }
        line
    });
    let out = IMPORT_NAMED.replace_all(&out, |caps: &Captures| {
        format!(
            "{}const {{ {} }} = require(\"{}\");",
            &caps[1],
            destructure(&caps[2]),
            &caps[3]
        )
    });
    let out = IMPORT_BARE.replace_all(&out, |caps: &Captures| {
        format!("{}require(\"{}\");", &caps[1], &caps[2])
    });
    let out = DYNAMIC_IMPORT.replace_all(&out, |caps: &Captures| {
        format!("{}Promise.resolve(require(\"{}\"))", &caps[1], &caps[2])
    });
    let out = DYNAMIC_IMPORT_COMPUTED.replace_all(&out, "${1}__blockframeImport(");
    rewrite_exports(&out)
}

/// Turn `export` forms into `module.exports` assignments. Declarations and
/// export lists are assigned after the body runs, once their bindings exist.
fn rewrite_exports(source: &str) -> String {
    let mut trailer: Vec<(String, String)> = Vec::new();

    let out = EXPORT_FROM.replace_all(source, |caps: &Captures| {
        let assignments = export_bindings(&caps[2])
            .into_iter()
            .map(|(local, exported)| {
                format!("module.exports.{exported} = __blockframeReexport.{local};")
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{}{{ const __blockframeReexport = require(\"{}\"); {} }}",
            &caps[1], &caps[3], assignments
        )
    });
    let out = EXPORT_STAR.replace_all(&out, |caps: &Captures| match caps.get(2) {
        Some(alias) => format!(
            "{}module.exports.{} = require(\"{}\");",
            &caps[1],
            alias.as_str(),
            &caps[3]
        ),
        None => format!("{}__blockframeExportAll(require(\"{}\"));", &caps[1], &caps[3]),
    });
    let out = EXPORT_LIST.replace_all(&out, |caps: &Captures| {
        trailer.extend(export_bindings(&caps[2]));
        caps[1].to_string()
    });
    let out = EXPORT_PATTERN.replace_all(&out, |caps: &Captures| {
        trailer.extend(pattern_names(&caps[3]).into_iter().map(|name| (name.clone(), name)));
        format!("{}{} {}", &caps[1], &caps[2], &caps[3])
    });
    let out = EXPORT_DECL.replace_all(&out, |caps: &Captures| {
        trailer.push((caps[3].to_string(), caps[3].to_string()));
        format!("{}{}{}", &caps[1], &caps[2], &caps[3])
    });
    let mut out = EXPORT_DEFAULT
        .replace_all(&out, "${1}module.exports.default = ")
        .into_owned();

    for (local, exported) in trailer {
        out.push_str(&format!("\nmodule.exports.{exported} = {local};"));
    }
    out
}

/// `a, b as c` -> `[(a, a), (b, c)]`
fn export_bindings(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|binding| match binding.split_once(" as ") {
            Some((local, exported)) => (local.trim().to_string(), exported.trim().to_string()),
            None => (binding.to_string(), binding.to_string()),
        })
        .collect()
}

/// Names bound by a flat `{ a, b: c, d = 1, ...rest }` or `[a, , b]` pattern.
fn pattern_names(pattern: &str) -> Vec<String> {
    pattern[1..pattern.len() - 1]
        .split(',')
        .filter_map(|element| {
            let element = element.trim().trim_start_matches("...");
            let binding = element.rsplit_once(':').map_or(element, |(_, b)| b);
            let name = binding.split('=').next().unwrap_or_default().trim();
            IDENT.is_match(name).then(|| name.to_string())
        })
        .collect()
}

/// `a, b as c` -> `a, b: c`
fn destructure(named: &str) -> String {
    named
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|binding| match binding.split_once(" as ") {
            Some((name, alias)) => format!("{}: {}", name.trim(), alias.trim()),
            None => binding.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn wrap<'a>(body: &str, allowed: impl Iterator<Item = &'a ImportRecord>) -> String {
    let table = allowed
        .map(|i| format!("{:?}: true", i.specifier))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"(function (__blockframeHost) {{
"use strict";
const __blockframeAllowed = {{ {table} }};
const __blockframeNoop = new Proxy(function () {{}}, {{
  get: (_, key) => (key === "__esModule" ? false : __blockframeNoop),
  apply: () => undefined,
  construct: () => ({{}}),
}});
const __blockframeDefault = (m) => (m && m.__esModule ? m.default : m);
const __blockframeImport = (name) => Promise.resolve().then(() => require(name));
const __blockframeExportAll = (m) => {{
  for (const key of Object.keys(Object(m))) {{
    if (key !== "default") module.exports[key] = m[key];
  }}
}};
const require = (name) => {{
  if (Object.prototype.hasOwnProperty.call(__blockframeAllowed, name)) {{
    return __blockframeHost.modules[name];
  }}
  __blockframeHost.warn("unsupported import: " + name);
  return __blockframeNoop;
}};
const module = {{ exports: {{}} }};
const exports = module.exports;
{body}
return module.exports;
}})"#
    )
}
