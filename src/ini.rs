//! Order-preserving reader/writer for the `[section]` / `key = value` text format shared by the
//! AWS credentials and config files. Comments and blank lines are not preserved on rewrite;
//! indented continuation lines are.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_owned(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    sections: Vec<Section>,
}

impl Document {
    /// Lines indented under a key continue its value (nested AWS settings such as
    /// `services` blocks) and are kept as `\n  <line>` inside that value.
    pub fn parse(text: &str) -> Self {
        let mut doc = Self::default();
        let mut current: Option<usize> = None;
        let mut last_key: Option<String> = None;
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if raw.starts_with(char::is_whitespace) {
                if let (Some(i), Some(key)) = (current, last_key.as_deref()) {
                    let section = &mut doc.sections[i];
                    if let Some(entry) = section.entries.iter_mut().find(|(k, _)| k == key) {
                        entry.1.push_str("\n  ");
                        entry.1.push_str(line);
                        continue;
                    }
                }
            }
            if let Some(name) = line
                .strip_prefix('[')
                .and_then(|l| l.split_once(']'))
                .map(|(name, _)| name)
            {
                // Duplicated headers are merged into the first occurrence
                current = Some(doc.position_or_insert(name.trim()));
                last_key = None;
                continue;
            }
            let Some(current) = current.map(|i| &mut doc.sections[i]) else {
                tracing::trace!("ignoring a line before the first section");
                continue;
            };
            match line.split_once('=') {
                Some((k, v)) => {
                    let key = k.trim();
                    current.set(key, v.trim());
                    last_key = Some(key.to_owned());
                }
                None => tracing::trace!(section = ?current.name, "ignoring a line without '='"),
            }
        }
        doc
    }

    fn position_or_insert(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|s| s.name == name) {
            Some(i) => i,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (k, v) in section.entries.iter() {
                out.push_str(k);
                out.push_str(" =");
                if !v.is_empty() && !v.starts_with('\n') {
                    out.push(' ');
                }
                out.push_str(v);
                out.push('\n');
            }
        }
        out
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the named section, appending an empty one if absent.
    pub fn entry(&mut self, name: &str) -> &mut Section {
        let idx = self.position_or_insert(name);
        &mut self.sections[idx]
    }

    /// Removes every section for which `keep` returns false; returns the removed names.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        self.sections.retain(|s| {
            let k = keep(&s.name);
            if !k {
                removed.push(s.name.clone());
            }
            k
        });
        removed
    }
}
