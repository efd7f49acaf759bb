use aya::{
    programs::{self, ProgramError},
    Ebpf,
};

use std::collections::HashMap;

use crate::util::elf::{self, AttachSection, ProgramSections};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing tracepoint category for program: {0}")]
    NoTpCategory(String),
    #[error("missing kernel attach function for program: {0}")]
    NoAttachFn(String),
    #[error("missing program: {0}")]
    NoProgram(String),
    #[error("unsupported program type for program: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Program(#[from] ProgramError),
}

pub struct Programs<'a> {
    m: HashMap<String, Program<'a>>,
}

impl<'a> Programs<'a> {
    pub fn with_bpf(bpf: &'a mut Ebpf) -> Self {
        let m = bpf
            .programs_mut()
            .map(|(name, p)| (name.to_string(), Program::from_program(name.to_string(), p)))
            .collect();

        Self { m }
    }

    pub fn with_elf_info(mut self, data: &[u8]) -> Result<Self, elf::Error> {
        let sections = ProgramSections::parse(data)?;
        // prog_name is an Elf symbol name
        for (prog_name, prog) in self.m.iter_mut() {
            prog.section = sections.get(prog_name).cloned()
        }
        Ok(self)
    }

    pub fn get_mut<S: AsRef<str>>(&mut self, name: S) -> Result<&mut Program<'a>, Error> {
        self.m
            .get_mut(name.as_ref())
            .ok_or_else(|| Error::NoProgram(name.as_ref().to_string()))
    }

    pub fn into_vec_sorted_by_prio(self) -> Vec<(String, Program<'a>)> {
        let mut sorted: Vec<(String, Program)> = self.m.into_iter().collect();
        sorted.sort_unstable_by_key(|(_, p)| p.prio_by_prog());
        sorted
    }
}

pub struct Program<'a> {
    pub prio: u8,
    pub name: String,
    pub section: Option<AttachSection>,
    pub program: &'a mut programs::Program,
    pub loaded: bool,
    pub attached: bool,
}

impl<'a> Program<'a> {
    pub fn from_program(name: String, p: &'a mut programs::Program) -> Self {
        Program {
            prio: 50,
            name,
            section: None,
            program: p,
            loaded: false,
            attached: false,
        }
    }

    /// Exit probes get attached after entry ones, so that when they
    /// start firing the state they consume is already being produced
    pub fn prio_by_prog(&self) -> u8 {
        match self.prog() {
            programs::Program::TracePoint(_) => {
                if self
                    .attach_point()
                    .is_some_and(|a| a.starts_with("sys_exit"))
                {
                    return self.prio.saturating_add(1);
                }
                self.prio
            }
            programs::Program::KProbe(p) => match p.kind() {
                programs::ProbeKind::KRetProbe => self.prio.saturating_add(1),
                _ => self.prio,
            },
            _ => self.prio,
        }
    }

    /// Returns the name of the attach point in kernel land
    #[inline]
    pub fn attach_point(&self) -> Option<String> {
        self.section
            .as_ref()
            .and_then(|s| s.attach_point())
            .map(str::to_string)
    }

    #[inline]
    fn tracepoint_category(&self) -> Option<String> {
        self.section
            .as_ref()
            .and_then(|s| s.tracepoint_category())
            .map(str::to_string)
    }

    pub fn prio(&mut self, prio: u8) -> &mut Self {
        self.prio = prio;
        self
    }

    pub fn prog(&self) -> &programs::Program {
        self.program
    }

    pub fn prog_mut(&mut self) -> &mut programs::Program {
        self.program
    }

    pub fn load(&mut self) -> Result<(), Error> {
        let prog_name = self.name.clone();

        match self.prog_mut() {
            programs::Program::TracePoint(p) => p.load()?,
            programs::Program::KProbe(p) => p.load()?,
            _ => return Err(Error::Unsupported(prog_name)),
        }
        self.loaded = true;
        Ok(())
    }

    pub fn attach(&mut self) -> Result<(), Error> {
        let program_name = self.name.clone();
        let kernel_attach_fn = self.attach_point();
        let tracepoint_category = self.tracepoint_category();

        match self.prog_mut() {
            programs::Program::TracePoint(p) => {
                let cat = tracepoint_category.ok_or(Error::NoTpCategory(program_name.clone()))?;
                let attach = kernel_attach_fn.ok_or(Error::NoAttachFn(program_name))?;
                p.attach(&cat, &attach)?;
            }
            programs::Program::KProbe(p) => {
                let attach = kernel_attach_fn.ok_or(Error::NoAttachFn(program_name))?;
                p.attach(attach, 0)?;
            }
            _ => return Err(Error::Unsupported(program_name)),
        }
        self.attached = true;
        Ok(())
    }

    pub fn load_and_attach(&mut self) -> Result<(), Error> {
        self.load()?;
        self.attach()
    }
}
