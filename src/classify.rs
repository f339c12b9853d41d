//! Technology detection over diff text.
//!
//! A fixed catalog maps a canonical technology name to a signature regex
//! (import statements, config file names, API idioms). Matching is
//! case-insensitive and best-effort: a hit anywhere in the patch counts, and
//! known false positives are accepted (the Docker `FROM` signature also
//! fires on JavaScript `import … from`).

use anyhow::{Context, Result};
use regex::{RegexSet, RegexSetBuilder};
use std::collections::BTreeSet;

/// Canonical technology name → detection pattern.
pub const TECHNOLOGY_CATALOG: &[(&str, &str)] = &[
    // JavaScript / TypeScript
    ("React", r#"import\s+.*\s+from\s+['"]react['"]"#),
    ("Vue", r#"import\s+.*\s+from\s+['"]vue['"]"#),
    ("Svelte", r#"import\s+.*\s+from\s+['"]svelte"#),
    ("Angular", r#"import\s+.*\s+from\s+['"]@angular/core['"]"#),
    ("TailwindCSS", r"tailwindcss|@tailwind"),
    ("Vite", r#"import\s+.*\s+from\s+['"]vite['"]"#),
    ("Next.js", r#"import\s+.*\s+from\s+['"]next/"#),
    (
        "Express",
        r#"require\(['"]express['"]\)|import\s+.*\s+from\s+['"]express['"]"#,
    ),
    (
        "WebSockets",
        r#"new\s+WebSocket\s*\(|require\(['"]ws['"]\)|from\s+['"](ws|socket\.io(-client)?)['"]"#,
    ),
    // Python
    ("FastAPI", r#"import\s+.*\s+from\s+['"]fastapi['"]"#),
    ("Flask", r#"import\s+.*\s+from\s+['"]flask['"]"#),
    ("Django", r#"import\s+.*\s+from\s+['"]django['"]"#),
    ("Pandas", r"import\s+pandas\s+as"),
    ("NumPy", r"import\s+numpy\s+as"),
    ("PyTorch", r"import\s+torch"),
    ("TensorFlow", r"import\s+tensorflow\s+as"),
    ("LangChain", r#"import\s+.*\s+from\s+['"]langchain"#),
    // Cloud & DevOps
    ("Docker", r"FROM\s+|docker-compose.yml|Dockerfile"),
    ("GitHub Actions", r"on:\s+(push|pull_request)|jobs:"),
    ("Terraform", r#"resource\s+['"]aws_"#),
    ("Kubernetes", r"apiVersion:\s+apps/v1|kind:\s+Deployment"),
    // Databases
    ("SQLAlchemy", r"import\s+sqlalchemy"),
    (
        "Prisma",
        r#"import\s+\{\s*PrismaClient\s*\}\s+from\s+['"]@prisma/client['"]"#,
    ),
    ("PostgreSQL", r"postgresql:|psycopg2"),
    ("MongoDB", r"mongodb:|pymongo"),
    ("Redis", r#"redis://|import\s+redis|from\s+['"]i?o?redis['"]"#),
    // Other
    (
        "GraphQL",
        r#"import\s+.*\s+from\s+['"]graphql['"]|type\s+Query\s*\{|type\s+Mutation\s*\{"#,
    ),
];

/// Compiled technology signatures.
///
/// All patterns are evaluated in a single pass with a [`RegexSet`].
pub struct TechnologyClassifier {
    names: Vec<&'static str>,
    patterns: RegexSet,
}

impl TechnologyClassifier {
    /// Compile the built-in [`TECHNOLOGY_CATALOG`].
    pub fn new() -> Result<Self> {
        Self::from_catalog(TECHNOLOGY_CATALOG)
    }

    pub fn from_catalog(catalog: &[(&'static str, &str)]) -> Result<Self> {
        let patterns = RegexSetBuilder::new(catalog.iter().map(|(_, p)| *p))
            .case_insensitive(true)
            .build()
            .context("Failed to compile technology catalog")?;
        Ok(Self {
            names: catalog.iter().map(|(name, _)| *name).collect(),
            patterns,
        })
    }

    /// Technologies whose signature appears anywhere in `patch`.
    ///
    /// `None` and empty text yield the empty set.
    pub fn classify(&self, patch: Option<&str>) -> BTreeSet<&'static str> {
        match patch {
            Some(text) if !text.is_empty() => self
                .patterns
                .matches(text)
                .into_iter()
                .map(|idx| self.names[idx])
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
