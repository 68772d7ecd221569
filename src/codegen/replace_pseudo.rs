use crate::{
    codegen::gen::{type_to_asm, AsmFunction, AsmInstruction, AsmOperand, AsmProgram, AsmRegister},
    semantics::{
        storage::FrameLayout,
        typechecker::{IdentifierAttrs, SymbolTable},
    },
};
use std::collections::HashMap;

pub struct PseudoMap<'a> {
    frame: &'a FrameLayout,
    symbols: &'a SymbolTable,
    temps: HashMap<String, isize>,
    depth: usize,
}

impl<'a> PseudoMap<'a> {
    pub fn new(frame: &'a FrameLayout, symbols: &'a SymbolTable) -> PseudoMap<'a> {
        PseudoMap {
            frame,
            symbols,
            temps: HashMap::new(),
            depth: frame.size,
        }
    }

    pub fn lookup(&mut self, name: &str, offset: isize) -> AsmOperand {
        if let Some(slot) = self.frame.slots.get(name) {
            return AsmOperand::Memory(AsmRegister::Bp, slot + offset);
        }

        let symbol = self.symbols.get(name);
        if symbol.map_or(true, |s| s.attrs == IdentifierAttrs::StaticAttr) {
            return AsmOperand::Data(name.to_owned(), offset);
        }

        if let Some(slot) = self.temps.get(name) {
            return AsmOperand::Memory(AsmRegister::Bp, slot + offset);
        }

        let size = symbol.map_or(8, |s| type_to_asm(&s._type).size());
        self.depth = (self.depth + size).next_multiple_of(size);
        let slot = -(self.depth as isize);
        self.temps.insert(name.to_owned(), slot);
        AsmOperand::Memory(AsmRegister::Bp, slot + offset)
    }

    pub fn stack_space(&self) -> usize {
        self.depth
    }
}

pub trait ReplacePseudo {
    fn replace_pseudo(&self, map: &mut PseudoMap) -> Self;
}

impl ReplacePseudo for AsmOperand {
    fn replace_pseudo(&self, map: &mut PseudoMap) -> Self {
        match self {
            AsmOperand::Pseudo(name) => map.lookup(name, 0),
            AsmOperand::PseudoMem(name, offset) => map.lookup(name, *offset),
            other => other.clone(),
        }
    }
}

impl ReplacePseudo for AsmInstruction {
    fn replace_pseudo(&self, map: &mut PseudoMap) -> Self {
        match self {
            AsmInstruction::Mov { asm_type, src, dst } => AsmInstruction::Mov {
                asm_type: *asm_type,
                src: src.replace_pseudo(map),
                dst: dst.replace_pseudo(map),
            },
            AsmInstruction::Movsx {
                src_type,
                src,
                dst_type,
                dst,
            } => AsmInstruction::Movsx {
                src_type: *src_type,
                src: src.replace_pseudo(map),
                dst_type: *dst_type,
                dst: dst.replace_pseudo(map),
            },
            AsmInstruction::Unary {
                asm_type,
                op,
                operand,
            } => AsmInstruction::Unary {
                asm_type: *asm_type,
                op: *op,
                operand: operand.replace_pseudo(map),
            },
            AsmInstruction::Binary {
                asm_type,
                op,
                lhs,
                rhs,
            } => AsmInstruction::Binary {
                asm_type: *asm_type,
                op: *op,
                lhs: lhs.replace_pseudo(map),
                rhs: rhs.replace_pseudo(map),
            },
            AsmInstruction::Cmp { asm_type, lhs, rhs } => AsmInstruction::Cmp {
                asm_type: *asm_type,
                lhs: lhs.replace_pseudo(map),
                rhs: rhs.replace_pseudo(map),
            },
            AsmInstruction::Idiv { asm_type, operand } => AsmInstruction::Idiv {
                asm_type: *asm_type,
                operand: operand.replace_pseudo(map),
            },
            AsmInstruction::SetCC { condition, operand } => AsmInstruction::SetCC {
                condition: *condition,
                operand: operand.replace_pseudo(map),
            },
            AsmInstruction::Lea { src, dst } => AsmInstruction::Lea {
                src: src.replace_pseudo(map),
                dst: dst.replace_pseudo(map),
            },
            AsmInstruction::Push(operand) => AsmInstruction::Push(operand.replace_pseudo(map)),
            AsmInstruction::Cdq { .. }
            | AsmInstruction::Jmp { .. }
            | AsmInstruction::JmpCC { .. }
            | AsmInstruction::Label(_)
            | AsmInstruction::Call { .. }
            | AsmInstruction::Ret => self.clone(),
        }
    }
}

impl AsmFunction {
    pub fn replace_pseudo(&self, symbols: &SymbolTable) -> AsmFunction {
        let mut map = PseudoMap::new(&self.frame, symbols);
        let instructions = self
            .instructions
            .iter()
            .map(|instr| instr.replace_pseudo(&mut map))
            .collect();

        AsmFunction {
            name: self.name.clone(),
            instructions,
            frame: self.frame.clone(),
            stack_space: map.stack_space(),
        }
    }
}

impl AsmProgram {
    pub fn replace_pseudo(&self, symbols: &SymbolTable) -> AsmProgram {
        AsmProgram {
            functions: self
                .functions
                .iter()
                .map(|f| f.replace_pseudo(symbols))
                .collect(),
            static_vars: self.static_vars.clone(),
            strings: self.strings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::ast::Type, semantics::typechecker::Symbol};

    #[test]
    fn operands_resolve_to_frame_slots_temporaries_and_data() {
        let mut frame = FrameLayout::default();
        frame.slots.insert("var.x.1".into(), -4);
        frame.size = 4;

        let mut symbols = SymbolTable::new();
        symbols.insert(
            "var.x.1".into(),
            Symbol {
                _type: Type::Int,
                attrs: IdentifierAttrs::LocalAttr,
            },
        );
        symbols.insert(
            "tmp.1".into(),
            Symbol {
                _type: Type::Pointer(Type::Int.into()),
                attrs: IdentifierAttrs::LocalAttr,
            },
        );
        symbols.insert(
            "memo".into(),
            Symbol {
                _type: Type::Int,
                attrs: IdentifierAttrs::StaticAttr,
            },
        );

        let mut map = PseudoMap::new(&frame, &symbols);
        assert_eq!(
            AsmOperand::Pseudo("var.x.1".into()).replace_pseudo(&mut map),
            AsmOperand::Memory(AsmRegister::Bp, -4)
        );
        assert_eq!(
            AsmOperand::Pseudo("tmp.1".into()).replace_pseudo(&mut map),
            AsmOperand::Memory(AsmRegister::Bp, -16)
        );
        assert_eq!(
            AsmOperand::Pseudo("tmp.1".into()).replace_pseudo(&mut map),
            AsmOperand::Memory(AsmRegister::Bp, -16)
        );
        assert_eq!(
            AsmOperand::PseudoMem("memo".into(), 8).replace_pseudo(&mut map),
            AsmOperand::Data("memo".into(), 8)
        );
        assert_eq!(map.stack_space(), 16);
    }
}
