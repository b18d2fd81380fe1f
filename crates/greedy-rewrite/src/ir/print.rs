use std::fmt;

use super::module::{BlockId, Module, OpId, ValueId};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_op(self, self.top(), 0, f)
    }
}

/// Renders one operation (and its regions) in generic form.
pub fn print_op(module: &Module, op: OpId) -> String {
    struct Adapter<'a>(&'a Module, OpId);
    impl fmt::Display for Adapter<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt_op(self.0, self.1, 0, f)
        }
    }
    Adapter(module, op).to_string()
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, text: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    f.write_str(text)?;
    f.write_str("\n")
}

fn value_list(values: &[ValueId]) -> String {
    values
        .iter()
        .map(|value| format!("%{}", value.0))
        .collect::<Vec<_>>()
        .join(", ")
}

fn type_list(module: &Module, values: &[ValueId]) -> String {
    values
        .iter()
        .map(|value| module.value_type(*value).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_op(module: &Module, op: OpId, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let operation = module.op(op);
    let mut header = String::new();
    if !operation.results().is_empty() {
        header.push_str(&value_list(operation.results()));
        header.push_str(" = ");
    }
    header.push_str(&format!(
        "\"{}\"({})",
        operation.kind(),
        value_list(operation.operands())
    ));
    if !operation.attrs().is_empty() {
        let attrs = operation
            .attrs()
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        header.push_str(&format!(" {{{attrs}}}"));
    }
    let signature = format!(
        " : ({}) -> ({})",
        type_list(module, operation.operands()),
        type_list(module, operation.results())
    );
    if operation.regions().is_empty() {
        return write_line(f, indent, &(header + &signature));
    }

    write_line(f, indent, &(header + " ({"))?;
    for (idx, region) in operation.regions().iter().enumerate() {
        if idx > 0 {
            write_line(f, indent, "}, {")?;
        }
        for block in module.region(*region).blocks() {
            fmt_block(module, *block, indent + 1, f)?;
        }
    }
    write_line(f, indent, &format!("}}){signature}"))
}

fn fmt_block(
    module: &Module,
    block: BlockId,
    indent: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    let args = module
        .block(block)
        .args()
        .iter()
        .map(|arg| format!("%{}: {}", arg.0, module.value_type(*arg)))
        .collect::<Vec<_>>();
    if args.is_empty() {
        write_line(f, indent, &format!("^bb{}:", block.0))?;
    } else {
        write_line(f, indent, &format!("^bb{}({}):", block.0, args.join(", ")))?;
    }
    for op in module.block(block).ops() {
        fmt_op(module, *op, indent + 1, f)?;
    }
    Ok(())
}
