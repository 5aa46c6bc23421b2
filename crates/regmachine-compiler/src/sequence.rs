//! Instruction sequences with register bookkeeping.
//!
//! Every compiled fragment records which registers it reads before writing
//! (`needs`) and which it clobbers (`modifies`). The combiners use those
//! sets to insert `save`/`restore` pairs only where a later fragment needs
//! a register an earlier one destroys.

use std::collections::HashSet;
use std::fmt;

use regmachine::{Inst, VExp};

/// Registers the compiler emits code for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Current environment
    Env,
    /// Procedure being applied
    Proc,
    /// Results
    Val,
    /// Evaluated operands
    Argl,
    /// Return address
    Continue,
}

impl Register {
    pub fn name(self) -> &'static str {
        match self {
            Register::Env => "env",
            Register::Proc => "proc",
            Register::Val => "val",
            Register::Argl => "argl",
            Register::Continue => "continue",
        }
    }

    pub fn reg(self) -> VExp {
        VExp::reg(self.name())
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub const ALL_REGS: &[Register] = &[
    Register::Env,
    Register::Proc,
    Register::Val,
    Register::Argl,
    Register::Continue,
];

/// What happens after a fragment computes its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linkage {
    /// Fall through to the next instruction
    Next,
    /// Jump to the address in `continue`
    Return,
    /// Jump to a named label
    Label(String),
}

#[derive(Debug, Clone, Default)]
pub struct InstructionSeq {
    pub needs: HashSet<Register>,
    pub modifies: HashSet<Register>,
    pub statements: Vec<Inst>,
}

impl InstructionSeq {
    pub fn new(needs: &[Register], modifies: &[Register], statements: Vec<Inst>) -> Self {
        Self {
            needs: needs.iter().copied().collect(),
            modifies: modifies.iter().copied().collect(),
            statements,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A lone label; touches no registers.
    pub fn label(name: &str) -> Self {
        Self::new(&[], &[], vec![Inst::label(name)])
    }

    pub fn needs_register(&self, reg: Register) -> bool {
        self.needs.contains(&reg)
    }

    pub fn modifies_register(&self, reg: Register) -> bool {
        self.modifies.contains(&reg)
    }
}

/// Run `seq1` then `seq2`.
///
/// needs = needs(seq1) ∪ (needs(seq2) − modifies(seq1))
pub fn append_instruction_sequences(seq1: InstructionSeq, seq2: InstructionSeq) -> InstructionSeq {
    let needs = seq1
        .needs
        .iter()
        .chain(seq2.needs.difference(&seq1.modifies))
        .copied()
        .collect();
    let modifies = seq1.modifies.union(&seq2.modifies).copied().collect();
    let mut statements = seq1.statements;
    statements.extend(seq2.statements);
    InstructionSeq {
        needs,
        modifies,
        statements,
    }
}

pub fn append_sequences(seqs: impl IntoIterator<Item = InstructionSeq>) -> InstructionSeq {
    seqs.into_iter()
        .reduce(append_instruction_sequences)
        .unwrap_or_default()
}

/// Append `seq2` to `seq1`, wrapping `seq1` in save/restore for every
/// register of `regs` that `seq1` modifies and `seq2` needs.
pub fn preserving(regs: &[Register], seq1: InstructionSeq, seq2: InstructionSeq) -> InstructionSeq {
    let Some((&first, rest)) = regs.split_first() else {
        return append_instruction_sequences(seq1, seq2);
    };

    if seq1.modifies_register(first) && seq2.needs_register(first) {
        let mut needs = seq1.needs;
        needs.insert(first);
        let mut modifies = seq1.modifies;
        modifies.remove(&first);

        let mut statements = Vec::with_capacity(seq1.statements.len() + 2);
        statements.push(Inst::save(first.name()));
        statements.extend(seq1.statements);
        statements.push(Inst::restore(first.name()));

        let protected = InstructionSeq {
            needs,
            modifies,
            statements,
        };
        preserving(rest, protected, seq2)
    } else {
        preserving(rest, seq1, seq2)
    }
}

/// Attach a procedure body that is jumped to, not fallen into; its
/// register use does not count.
pub fn tack_on_instruction_sequence(seq: InstructionSeq, body: InstructionSeq) -> InstructionSeq {
    let mut statements = seq.statements;
    statements.extend(body.statements);
    InstructionSeq {
        needs: seq.needs,
        modifies: seq.modifies,
        statements,
    }
}

/// Two alternatives of which exactly one runs.
pub fn parallel_instruction_sequences(
    seq1: InstructionSeq,
    seq2: InstructionSeq,
) -> InstructionSeq {
    let needs = seq1.needs.union(&seq2.needs).copied().collect();
    let modifies = seq1.modifies.union(&seq2.modifies).copied().collect();
    let mut statements = seq1.statements;
    statements.extend(seq2.statements);
    InstructionSeq {
        needs,
        modifies,
        statements,
    }
}

pub fn compile_linkage(linkage: &Linkage) -> InstructionSeq {
    match linkage {
        Linkage::Return => {
            InstructionSeq::new(&[Register::Continue], &[], vec![Inst::goto_reg("continue")])
        }
        Linkage::Next => InstructionSeq::empty(),
        Linkage::Label(label) => InstructionSeq::new(&[], &[], vec![Inst::goto_label(label)]),
    }
}

/// `seq` followed by the jump its linkage asks for, keeping `continue`
/// alive across `seq` when the jump reads it.
pub fn end_with_linkage(linkage: &Linkage, seq: InstructionSeq) -> InstructionSeq {
    preserving(&[Register::Continue], seq, compile_linkage(linkage))
}
