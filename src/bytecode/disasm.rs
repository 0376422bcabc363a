use super::ir::Bytecode;
use super::op::{CALL_NAMED, CALL_SPREAD, Opcode, read_operands};
use crate::lang::function::CompiledFunction;
use crate::lang::operator::Token;
use crate::lang::value::Object;

/// Disassembly of a whole program: `main` followed by every function in the
/// constant pool.
pub fn disassemble_bytecode(bc: &Bytecode) -> String {
    let mut out = String::from("=== BYTECODE PROGRAM ===\n");
    out.push_str(&format!(
        "{} constants, {} modules\n\n",
        bc.constants.len(),
        bc.num_modules
    ));

    write_function(&mut out, "main", &bc.main, &bc.constants);
    for (i, c) in bc.constants.iter().enumerate() {
        if let Object::Function(f) = c {
            let label = if f.name.is_empty() {
                format!("const[{}]", i)
            } else {
                format!("const[{}] {}", i, f.name)
            };
            write_function(&mut out, &label, f, &bc.constants);
        }
    }
    out
}

fn write_function(out: &mut String, label: &str, f: &CompiledFunction, constants: &[Object]) {
    const RULE: &str = "════════════════════════════════════════\n";
    out.push_str(RULE);
    out.push_str(&format!(" {}\n", label));
    out.push_str(&format!(
        " params={} variadic={} named={} locals={}\n",
        f.params.len(),
        f.variadic,
        f.named_params.len(),
        f.num_locals
    ));
    out.push_str(RULE);
    out.push_str(&disassemble(f, constants));
    out.push('\n');
}

/// Listing of one function's instructions, one per line, with jump targets
/// marked.
pub fn disassemble(f: &CompiledFunction, constants: &[Object]) -> String {
    let ins = &f.instructions[..];
    let targets = collect_jump_targets(ins);
    let mut out = String::new();

    let mut at = 0;
    while at < ins.len() {
        let is_target = targets.contains(&at);
        if is_target {
            out.push_str("      ┌──────────────────────────────────\n");
        }
        out.push_str(&format!("{:04} ", at));
        out.push_str(if is_target { "► " } else { "  " });

        let Some((op, operands)) = read_operands(ins, at) else {
            out.push_str(&format!("<bad byte {:#04x}>\n", ins[at]));
            at += 1;
            continue;
        };
        out.push_str(&format_instruction(op, operands, constants));
        out.push('\n');
        at += op.width();
    }
    out
}

fn collect_jump_targets(ins: &[u8]) -> Vec<usize> {
    let mut targets = Vec::new();
    let mut at = 0;
    while let Some((op, operands)) = read_operands(ins, at) {
        if op.is_jump() {
            let count = op.operand_widths().len();
            for &t in &operands[..count] {
                // SetupTry uses 0 for a missing target
                if (op != Opcode::SetupTry || t != 0) && !targets.contains(&t) {
                    targets.push(t);
                }
            }
        }
        at += op.width();
    }
    targets
}

fn format_instruction(op: Opcode, operands: [usize; 2], constants: &[Object]) -> String {
    let name = op.mnemonic();
    let constant = |i: usize| {
        constants
            .get(i)
            .map_or_else(|| "<missing>".to_string(), short_constant)
    };
    use Opcode::*;
    match op {
        Constant | GetGlobal | SetGlobal => {
            format!("{:<14}{:<6}; {}", name, operands[0], constant(operands[0]))
        }
        Closure => format!(
            "{:<14}{:<6}; {} free={}",
            name,
            operands[0],
            constant(operands[0]),
            operands[1]
        ),
        LoadModule => format!(
            "{:<14}{:<6}; {} slot={}",
            name,
            operands[0],
            constant(operands[0]),
            operands[1]
        ),
        BinaryOp | Unary => {
            let token = Token::from_u8(operands[0] as u8).map_or("?", Token::symbol);
            format!("{:<14}{}", name, token)
        }
        Call => {
            let mut flags = Vec::new();
            if operands[1] as u8 & CALL_SPREAD != 0 {
                flags.push("spread");
            }
            if operands[1] as u8 & CALL_NAMED != 0 {
                flags.push("named");
            }
            if flags.is_empty() {
                format!("{:<14}{}", name, operands[0])
            } else {
                format!("{:<14}{:<6}; {}", name, operands[0], flags.join(","))
            }
        }
        SetupTry => format!(
            "{:<14}catch={} finally={}",
            name,
            target_or_dash(operands[0]),
            target_or_dash(operands[1])
        ),
        _ if op.is_jump() => format!("{:<14}(→ {:04})", name, operands[0]),
        _ => match op.operand_widths().len() {
            0 => name.to_string(),
            _ => format!("{:<14}{}", name, operands[0]),
        },
    }
}

fn target_or_dash(t: usize) -> String {
    if t == 0 {
        "-".to_string()
    } else {
        format!("{:04}", t)
    }
}

fn short_constant(c: &Object) -> String {
    match c {
        Object::String(s) => format!("{:?}", s),
        Object::Function(f) => format!("<fn {}>", f.name),
        Object::Dict(_) | Object::Array(_) | Object::SyncDict(_) => {
            let s = c.to_string();
            if s.chars().count() > 40 {
                format!("{}…", s.chars().take(40).collect::<String>())
            } else {
                s
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::Assembler;

    #[test]
    fn test_listing_marks_targets() {
        let mut asm = Assembler::new();
        let end = asm.label();
        asm.emit(Opcode::Constant, &[0]).unwrap();
        asm.emit_jump(Opcode::JumpFalsy, end);
        asm.emit(Opcode::BinaryOp, &[Token::Add as usize]).unwrap();
        asm.bind(end);
        asm.emit(Opcode::Return, &[1]).unwrap();
        let f = asm.into_function("f").unwrap();

        let text = disassemble(&f, &[Object::string("hi")]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0000   CONST         0     ; \"hi\"");
        assert_eq!(lines[1], "0003   JUMP_FALSY    (→ 0008)");
        assert_eq!(lines[2], "0006   BINARY_OP     +");
        assert!(lines[3].contains('┌'));
        assert_eq!(lines[4], "0008 ► RETURN        1");
    }

    #[test]
    fn test_bad_bytes_do_not_panic() {
        let f = CompiledFunction::new("f", vec![255u8, Opcode::Constant as u8]);
        let text = disassemble(&f, &[]);
        assert!(text.contains("<bad byte 0xff>"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_program_lists_function_constants() {
        let inner = CompiledFunction::new("inner", vec![Opcode::Return as u8, 0]);
        let bc = Bytecode::new(
            CompiledFunction::new("main", vec![Opcode::Return as u8, 0]),
            vec![Object::Function(std::sync::Arc::new(inner))],
        );
        let text = disassemble_bytecode(&bc);
        assert!(text.starts_with("=== BYTECODE PROGRAM ===\n1 constants, 0 modules\n\n═"));
        assert!(text.contains(" params=0 variadic=false named=0 locals=0\n"));
        assert!(text.contains(" main"));
        assert!(text.contains("const[0] inner"));
    }
}
