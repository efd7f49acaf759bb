use object::{self, Object, ObjectSection, ObjectSymbol, SymbolKind};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("object: {0}")]
    Object(#[from] object::Error),
}

/// Section a program lives in, its name tells where the program
/// attaches (ex: `kprobe/do_exit`, `tracepoint/sched/sched_process_fork`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachSection {
    pub name: String,
}

impl AttachSection {
    /// Kernel function or tracepoint name
    pub fn attach_point(&self) -> Option<&str> {
        self.name
            .split('/')
            .skip(1)
            .last()
            .filter(|s| !s.is_empty())
    }

    pub fn tracepoint_category(&self) -> Option<&str> {
        let v: Vec<&str> = self.name.split('/').collect();
        if v.len() < 3 {
            return None;
        }
        v.get(v.len() - 2).copied()
    }
}

/// Attach sections of the programs of an eBPF object, by program name
#[derive(Debug, Default)]
pub struct ProgramSections {
    sections: HashMap<String, AttachSection>,
}

impl ProgramSections {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let obj = object::read::File::parse(data)?;
        let mut s = Self::default();

        // programs are the function symbols, maps and licence are data
        for sym in obj.symbols().filter(|s| s.kind() == SymbolKind::Text) {
            let Some(section) = sym
                .section_index()
                .and_then(|i| obj.section_by_index(i).ok())
            else {
                continue;
            };

            if let (Ok(sym_name), Ok(sec_name)) = (sym.name(), section.name()) {
                s.sections.insert(
                    sym_name.to_string(),
                    AttachSection {
                        name: sec_name.to_string(),
                    },
                );
            }
        }
        Ok(s)
    }

    pub fn get<S: AsRef<str>>(&self, prog_name: S) -> Option<&AttachSection> {
        self.sections.get(prog_name.as_ref())
    }
}
