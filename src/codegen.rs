//! Code generation: canonical surface syntax, and the bytecode listing of compiled mode.

use itertools::Itertools;
use miette::Diagnostic;
use thiserror::Error;

use crate::{
    ast::{AssignTarget, FunctionLiteral, Node, NodeKind, Op, PropertyDef},
    vm_interpreter::{CodeReadError, Compiler},
    SourceReference, SourceSpan,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// The language's own syntax, fully parenthesized.
    Surface,
    /// Disassembly of the chunks the VM runs.
    Bytecode,
}

#[derive(Error, Diagnostic, Debug)]
pub enum CompileError {
    #[error("In a map only function calls and mathematical expressions are allowed.")]
    NonMathClosureBody {
        #[label("not allowed in a map")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Too many constants in one function")]
    TooManyConstants {
        #[label("while compiling this")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Too many {what} (at most 255)")]
    TooManyOperands {
        what: String,
        #[label("here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Jump too long")]
    JumpTooLong {
        #[label("in this construct")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Malformed bytecode: {cause}")]
    MalformedChunk {
        #[from]
        cause: CodeReadError,
    },
}

pub fn compile(
    node: &Node,
    mode: CompileMode,
    source_code: &SourceReference,
) -> Result<String, CompileError> {
    match mode {
        CompileMode::Surface => Ok(program_to_surface(node)),
        CompileMode::Bytecode => Ok(Compiler::compile_script(node, source_code)?.disassemble()?),
    }
}

/// Renders a whole statement list, one statement per line.
pub fn program_to_surface(node: &Node) -> String {
    let mut writer = SurfaceWriter::default();
    for statement in node.statements() {
        writer.statement(statement);
    }
    writer.out
}

/// Renders a single expression (statements are rendered as they would appear in a block).
pub fn to_surface(node: &Node) -> String {
    let mut writer = SurfaceWriter::default();
    if is_statement(node) {
        writer.statement(node);
        return writer.out.trim_end().to_string();
    }
    writer.expression(node);
    writer.out
}

pub fn function_to_surface(literal: &FunctionLiteral, is_map: bool) -> String {
    let mut writer = SurfaceWriter::default();
    writer.function(literal, is_map);
    writer.out
}

fn is_statement(node: &Node) -> bool {
    matches!(
        node.as_op(),
        Some(
            Op::Statements(_)
                | Op::Assign { .. }
                | Op::If { .. }
                | Op::IfElse { .. }
                | Op::While { .. }
                | Op::DoWhile { .. }
                | Op::For { .. }
                | Op::Use(_)
                | Op::Delete(_)
                | Op::Return(_)
                | Op::Expression(_)
        )
    )
}

pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

const INDENT: &str = "    ";

#[derive(Default)]
struct SurfaceWriter {
    out: String,
    indent: usize,
}

impl SurfaceWriter {
    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }
    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
    }

    fn statement(&mut self, node: &Node) {
        self.line_start();
        self.statement_body(node);
        self.push("\n");
    }
    /// Writes one statement without indentation or trailing newline.
    fn statement_body(&mut self, node: &Node) {
        match node.as_op() {
            Some(Op::Statements(statements)) => self.block(statements),
            Some(Op::Assign { target, value }) => {
                self.assignment(target, value);
                self.push(";");
            }
            Some(Op::If {
                condition,
                then_branch,
            }) => {
                self.push("if (");
                self.expression(condition);
                self.push(") ");
                self.branch(then_branch);
            }
            Some(Op::IfElse {
                condition,
                then_branch,
                else_branch,
            }) => {
                self.push("if (");
                self.expression(condition);
                self.push(") ");
                self.branch(then_branch);
                self.push(" else ");
                self.branch(else_branch);
            }
            Some(Op::While { condition, body }) => {
                self.push("while (");
                self.expression(condition);
                self.push(") ");
                self.branch(body);
            }
            Some(Op::DoWhile { body, condition }) => {
                self.push("do ");
                self.branch(body);
                self.push(" while (");
                self.expression(condition);
                self.push(");");
            }
            Some(Op::For {
                init,
                condition,
                step,
                body,
            }) => {
                self.push("for (");
                self.for_clause(init);
                self.push("; ");
                self.expression(condition);
                self.push("; ");
                self.for_clause(step);
                self.push(") ");
                self.branch(body);
            }
            Some(Op::Use(identifier)) => {
                self.push("use ");
                self.push(&identifier.name);
                self.push(";");
            }
            Some(Op::Delete(target)) => {
                self.push("delete ");
                self.expression(target);
                self.push(";");
            }
            Some(Op::Return(None)) => self.push("return;"),
            Some(Op::Return(Some(value))) => {
                self.push("return ");
                self.expression(value);
                self.push(";");
            }
            Some(Op::Expression(expression)) => {
                self.expression(expression);
                self.push(";");
            }
            _ => {
                self.expression(node);
                self.push(";");
            }
        }
    }
    fn for_clause(&mut self, node: &Node) {
        match node.as_op() {
            Some(Op::Assign { target, value }) => self.assignment(target, value),
            _ => self.expression(node),
        }
    }
    /// Branch bodies are always braced.
    fn branch(&mut self, body: &Node) {
        self.block(body.statements());
    }
    fn block(&mut self, statements: &[Node]) {
        self.push("{\n");
        self.indent += 1;
        for statement in statements {
            self.statement(statement);
        }
        self.indent -= 1;
        self.line_start();
        self.push("}");
    }
    fn assignment(&mut self, target: &AssignTarget, value: &Node) {
        match target {
            AssignTarget::Variable(identifier) => self.push(&identifier.name),
            AssignTarget::Property { object, name } => {
                self.expression(object);
                self.push(".");
                self.push(&name.name);
            }
            AssignTarget::Index { base, index } => {
                self.expression(base);
                self.push("[");
                self.expression(index);
                self.push("]");
            }
        }
        self.push(" = ");
        self.expression(value);
    }

    fn list(&mut self, nodes: &[Node]) {
        for (position, node) in nodes.iter().enumerate() {
            if position > 0 {
                self.push(", ");
            }
            self.expression(node);
        }
    }
    fn properties(&mut self, properties: &[PropertyDef]) {
        if properties.is_empty() {
            self.push("<< >>");
            return;
        }
        self.push("<< ");
        for (position, property) in properties.iter().enumerate() {
            if position > 0 {
                self.push(", ");
            }
            self.push(&property.name.name);
            self.push(": ");
            self.expression(&property.value);
        }
        self.push(" >>");
    }
    fn function(&mut self, literal: &FunctionLiteral, is_map: bool) {
        let params = literal.param_names().join(", ");
        if is_map {
            self.push(&format!("map ({}) -> ", params));
            self.expression(&literal.body);
        } else {
            self.push(&format!("function ({}) ", params));
            self.block(literal.body.statements());
        }
    }

    fn expression(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::Identifier(name) => self.push(name),
            NodeKind::Number(number) => self.push(&number.text),
            NodeKind::String(value) => self.push(&quote_string(value)),
            NodeKind::Boolean(value) => self.push(if *value { "true" } else { "false" }),
            NodeKind::Coordinate { axis, target } => {
                self.push(&format!("{}(", axis));
                self.expression(target);
                self.push(")");
            }
            NodeKind::Property { object, name } => {
                self.expression(object);
                self.push(".");
                self.push(&name.name);
            }
            NodeKind::Op(op) => match op {
                Op::Function(literal) => self.function(literal, false),
                Op::Map(literal) => {
                    self.push("(");
                    self.function(literal, true);
                    self.push(")");
                }
                Op::Call {
                    callee,
                    args,
                    attributes,
                } => {
                    self.expression(callee);
                    self.push("(");
                    self.list(args);
                    self.push(")");
                    if let Some(attributes) = attributes {
                        self.push(" ");
                        self.properties(attributes);
                    }
                }
                Op::Array(items) => {
                    self.push("[");
                    self.list(items);
                    self.push("]");
                }
                Op::Object(properties) => self.properties(properties),
                Op::Index { base, index } => {
                    self.expression(base);
                    self.push("[");
                    self.expression(index);
                    self.push("]");
                }
                Op::Binary {
                    operator,
                    left,
                    right,
                } => {
                    self.push("(");
                    self.expression(left);
                    self.push(&format!(" {} ", operator));
                    self.expression(right);
                    self.push(")");
                }
                Op::Unary { operator, operand } => {
                    self.push(&format!("({}", operator));
                    self.expression(operand);
                    self.push(")");
                }
                Op::Conditional {
                    condition,
                    then_value,
                    else_value,
                } => {
                    self.push("(");
                    self.expression(condition);
                    self.push(" ? ");
                    self.expression(then_value);
                    self.push(" : ");
                    self.expression(else_value);
                    self.push(")");
                }
                Op::Expression(expression) => self.expression(expression),
                Op::Statements(_)
                | Op::Assign { .. }
                | Op::If { .. }
                | Op::IfElse { .. }
                | Op::While { .. }
                | Op::DoWhile { .. }
                | Op::For { .. }
                | Op::Use(_)
                | Op::Delete(_)
                | Op::Return(_) => self.statement_body(node),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::Program, host::Host, Interpreter, InterpreterOpts, Parser, ParserOpts, RuntimeValue, Scanner,
    };
    use pretty_assertions::assert_eq;

    fn parse_program(source: &str) -> Program {
        let source_reference = SourceReference::new("test".to_string(), source.to_string());
        let (program, errors) =
            Parser::parse(Scanner::new(source), source_reference, ParserOpts::default());
        assert!(errors.is_empty(), "{}: {:?}", source, errors);
        match program {
            Some(program) => program,
            None => panic!("no program for {}", source),
        }
    }

    fn parse(source: &str) -> Node {
        parse_program(source).root
    }

    fn surface(source: &str) -> String {
        program_to_surface(&parse(source))
    }

    #[test]
    fn expressions_are_fully_parenthesized() {
        assert_eq!(surface("a = 1 + 2 * -b;"), "a = (1 + (2 * (-b)));\n");
        assert_eq!(surface("x = c ? 'it''s' : 'a\\\\b';"), "x = (c ? 'it''s' : 'a\\\\b');\n");
        assert_eq!(surface("p.x = X(q) ^ 2;"), "p.x = (X(q) ^ 2);\n");
        assert_eq!(
            surface("f(1, [2, 3]) << name: 'A' >>;"),
            "f(1, [2, 3]) << name: 'A' >>;\n"
        );
        assert_eq!(surface("m = map (x, y) -> x * y;"), "m = (map (x, y) -> (x * y));\n");
        assert_eq!(surface("o = << >>; o['k'] = 1.50;"), "o = << >>;\no['k'] = 1.50;\n");
    }

    #[test]
    fn statements_use_braced_blocks() {
        let source = "if (a) b = 1; else if (c) { d(); } for (i = 0; i < 3; i = i + 1) ; return;";
        assert_eq!(
            surface(source),
            [
                "if (a) {",
                "    b = 1;",
                "} else {",
                "    if (c) {",
                "        d();",
                "    }",
                "}",
                "for (i = 0; (i < 3); i = (i + 1)) {",
                "}",
                "return;",
                "",
            ]
            .join("\n")
        );
    }

    #[test]
    fn functions_render_with_indented_bodies() {
        let node = parse("f = function (a, b) { while (a) { a = a - 1; } return a + b; };");
        assert_eq!(
            program_to_surface(&node),
            [
                "f = function (a, b) {",
                "    while (a) {",
                "        a = (a - 1);",
                "    }",
                "    return (a + b);",
                "};",
                "",
            ]
            .join("\n")
        );
    }

    #[test]
    fn decompiled_closures_behave_like_the_original() -> Result<(), crate::ExecuteError> {
        let source = "f = function (n) {
            s = 0;
            for (i = 1; i <= n; i = i + 1) { if (i % 2 == 0) { s = s + i ^ 2; } else { s = s - 1; } }
            return [s, n > 3 && n < 10, 'n=' + n];
        }; f;";
        let mut output = Vec::new();
        let mut interpreter = Interpreter::new(&mut output).with_host(Host::default());
        let outcome = interpreter.parse(source)?;
        let decompiled = match outcome.value {
            Some(RuntimeValue::Closure(closure)) => closure.to_string(),
            other => panic!("expected a closure, got {:?}", other),
        };
        // the decompiled text parses to the same rendering
        assert_eq!(surface(&format!("g = {};", decompiled)), format!("g = {};\n", decompiled));
        let original = interpreter.snippet("f(6)")?;
        let mut compiled_output = Vec::new();
        let mut other = Interpreter::new(&mut compiled_output)
            .with_opts(InterpreterOpts::default().compiled());
        other.parse(&format!("g = {};", decompiled))?;
        assert_eq!(other.snippet("g(6)")?.to_string(), original.to_string());
        assert_eq!(original.to_string(), "[53, true, 'n=6']");
        Ok(())
    }

    #[test]
    fn bytecode_listing() -> Result<(), CompileError> {
        let program = parse_program("a = 1 + 2; f = map (x) -> x * a;");
        let listing = compile(&program.root, CompileMode::Bytecode, &program.source_reference)?;
        assert!(listing.starts_with("== <script> ==\n"), "{}", listing);
        assert!(listing.contains("SetLocal"), "{}", listing);
        assert!(listing.contains("== map@1 =="), "{}", listing);

        let program = parse_program("f = map (x) -> x > 1;");
        let error = compile(&program.root, CompileMode::Bytecode, &program.source_reference)
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            error,
            Some("In a map only function calls and mathematical expressions are allowed.".to_string())
        );
        Ok(())
    }
}
