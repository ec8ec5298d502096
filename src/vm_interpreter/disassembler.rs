use std::{convert::TryFrom, fmt::Write};

use super::chunk::{Chunk, CodeReadError, Constant, OpCode};
use crate::ast::{Axis, BinaryOperator};
use colored::Colorize;

#[derive(Clone, Copy)]
enum Style {
    Plain,
    Colored,
}

impl Chunk {
    /// Listing of this chunk followed by the chunks of the functions it defines.
    pub fn disassemble(&self) -> Result<String, CodeReadError> {
        let mut out = String::new();
        self.disassemble_into(&mut out, Style::Plain)?;
        Ok(out)
    }
    pub fn disassemble_colored(&self) -> Result<String, CodeReadError> {
        let mut out = String::new();
        self.disassemble_into(&mut out, Style::Colored)?;
        Ok(out)
    }
    fn disassemble_into(&self, out: &mut String, style: Style) -> Result<(), CodeReadError> {
        let _ = writeln!(out, "== {} ==", self.name());
        let mut offset = 0;
        while offset < self.code().len() {
            let (next_offset, line) = self.render_instruction(offset, style)?;
            let _ = writeln!(out, "{}", line);
            offset = next_offset;
        }
        for constant in self.constants() {
            if let Constant::Function(proto) = constant {
                out.push('\n');
                proto.chunk.disassemble_into(out, style)?;
            }
        }
        Ok(())
    }

    /// One colored instruction line; used by the VM trace.
    pub fn disassemble_instruction_at(
        &self,
        offset: usize,
    ) -> Result<(usize, String), CodeReadError> {
        self.render_instruction(offset, Style::Colored)
    }

    fn render_instruction(
        &self,
        initial_offset: usize,
        style: Style,
    ) -> Result<(usize, String), CodeReadError> {
        let paint = |text: String, color: fn(&str) -> colored::ColoredString| match style {
            Style::Plain => text,
            Style::Colored => color(&text).to_string(),
        };
        let (mut offset, op_code) = self.read_op_code(initial_offset)?;
        let mut operands = vec![];
        let constant = |offset: usize| -> Result<(usize, String), CodeReadError> {
            let (next_offset, address) = self.read_constant_address(offset)?;
            let value = self.get_constant(address)?;
            Ok((
                next_offset,
                format!(
                    "{} = {}",
                    paint(address.to_string(), |s| s.green()),
                    paint(value.to_string(), |s| s.blue())
                ),
            ))
        };
        match op_code {
            OpCode::Constant
            | OpCode::GetName
            | OpCode::GetCallee
            | OpCode::SetLocal
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::Closure
            | OpCode::Use => {
                let (next_offset, operand) = constant(offset)?;
                offset = next_offset;
                operands.push(operand);
            }
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
                let (next_offset, distance) = self.read_u16(offset)?;
                offset = next_offset;
                let target = match op_code {
                    OpCode::Loop => offset.checked_sub(distance as usize),
                    _ => Some(offset + distance as usize),
                };
                let target = target.ok_or(CodeReadError::InvalidOperand {
                    offset,
                    expected: "a jump inside the chunk",
                })?;
                operands.push(paint(format!("-> {:04}", target), |s| s.green()));
            }
            OpCode::Coordinate => {
                let (next_offset, axis) = self.read_u8(offset)?;
                offset = next_offset;
                let axis = Axis::try_from(axis).map_err(|_| CodeReadError::InvalidOperand {
                    offset,
                    expected: "an axis",
                })?;
                operands.push(paint(axis.to_string(), |s| s.blue()));
            }
            OpCode::Binary => {
                let (next_offset, operator) = self.read_u8(offset)?;
                offset = next_offset;
                let operator = BinaryOperator::try_from(operator).map_err(|_| {
                    CodeReadError::InvalidOperand {
                        offset,
                        expected: "a binary operator",
                    }
                })?;
                operands.push(paint(operator.to_string(), |s| s.blue()));
            }
            OpCode::Array | OpCode::Object => {
                let (next_offset, count) = self.read_u8(offset)?;
                offset = next_offset;
                operands.push(paint(count.to_string(), |s| s.blue()));
            }
            OpCode::Call | OpCode::CallWithAttributes | OpCode::CallNamed => {
                let (next_offset, argc) = self.read_u8(offset)?;
                operands.push(paint(format!("({})", argc), |s| s.blue()));
                let (next_offset, callee) = constant(next_offset)?;
                operands.push(callee);
                offset = next_offset;
                if op_code == OpCode::CallNamed {
                    let (next_offset, name) = constant(offset)?;
                    operands.push(name);
                    offset = next_offset;
                }
            }
            OpCode::Undefined
            | OpCode::True
            | OpCode::False
            | OpCode::Pop
            | OpCode::GetIndex
            | OpCode::SetIndex
            | OpCode::Negate
            | OpCode::Not
            | OpCode::Return
            | OpCode::End
            | OpCode::Delete => {}
        }
        let mut line = format!(
            "{} | {}",
            paint(format!("{:04}", initial_offset), |s| s.dimmed()),
            paint(format!("{:?}", op_code), |s| s.purple()),
        );
        for operand in operands {
            line.push(' ');
            line.push_str(&operand);
        }
        Ok((offset, line))
    }
}

#[cfg(test)]
mod tests {
    use crate::{vm_interpreter::Compiler, Parser, ParserOpts, Scanner, SourceReference};
    use pretty_assertions::assert_eq;

    #[test]
    fn listing() {
        let source = "a = [1, 'x'];\nif (a[0] > 0) f = map (t) -> X(t) * 2;";
        let source_reference = SourceReference::new("test".to_string(), source.to_string());
        let (program, _) = Parser::parse(
            Scanner::new(source),
            source_reference.clone(),
            ParserOpts::default(),
        );
        let listing = program
            .ok_or_else(|| "no program".to_string())
            .and_then(|program| {
                Compiler::compile_script(&program.root, &source_reference)
                    .map_err(|error| error.to_string())
            })
            .and_then(|chunk| chunk.disassemble().map_err(|error| error.to_string()));
        assert_eq!(
            listing,
            Ok([
                "== <script> ==",
                "0000 | Constant @0 = 1",
                "0002 | Constant @1 = \"x\"",
                "0004 | Array 2",
                "0006 | SetLocal @2 = \"a\"",
                "0008 | Pop",
                "0009 | GetName @2 = \"a\"",
                "0011 | Constant @3 = 0",
                "0013 | GetIndex",
                "0014 | Constant @3 = 0",
                "0016 | Binary >",
                "0018 | JumpIfFalse -> 0029",
                "0021 | Pop",
                "0022 | Closure @4 = <map@2>",
                "0024 | SetLocal @5 = \"f\"",
                "0026 | Jump -> 0031",
                "0029 | Pop",
                "0030 | Undefined",
                "0031 | End",
                "",
                "== map@2 ==",
                "0000 | GetName @0 = \"t\"",
                "0002 | Coordinate X",
                "0004 | Constant @1 = 2",
                "0006 | Binary *",
                "0008 | Return",
                "",
            ]
            .join("\n"))
        );
    }
}
