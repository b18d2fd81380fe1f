mod ir_support;

use greedy_rewrite::ir::{
    names, symbol_name, verify, AffineMap, Attribute, FunctionType, InsertPoint, IrError,
    IrMapping, IteratorType, Module, OpBuilder, OpKind, SymbolTable, Type, VerifyError,
};
use ir_support::{add_copy_func, func_names, memref, ops_in, slice};

fn empty_func(module: &mut Module, name: &str) -> greedy_rewrite::OpId {
    let body = module.body();
    let mut builder = OpBuilder::new(module, InsertPoint::BlockEnd(body));
    let (func, entry) = builder
        .func(name, FunctionType::new(Vec::new(), Vec::new()))
        .expect("create func");
    OpBuilder::new(module, InsertPoint::BlockEnd(entry))
        .ret(Vec::new())
        .expect("create return");
    func
}

#[test]
fn erasing_a_used_producer_fails_without_mutation() {
    let mut module = Module::new();
    let window = slice(&[0, 0], &[4, 4], &[1, 1]);
    let (func, _) =
        add_copy_func(&mut module, "main", &[8, 8], &[4, 4], Some(&window), None).expect("build");
    let view = ops_in(&module, func, OpKind::SubView)[0];
    let before = module.to_string();

    let err = module.erase_op(view).expect_err("subview still feeds the copy");
    assert!(matches!(
        err,
        IrError::LiveUses {
            kind: OpKind::SubView,
            uses: 1,
            ..
        }
    ));
    assert!(module.is_live(view));
    assert_eq!(module.to_string(), before);
}

#[test]
fn erased_handles_go_stale() {
    let mut module = Module::new();
    let (func, copy) =
        add_copy_func(&mut module, "main", &[4], &[4], None, None).expect("build");
    let source = module.op(copy).operands()[0];
    assert_eq!(module.users(source), vec![copy]);

    module.erase_op(copy).expect("copy has no results");
    assert!(!module.is_live(copy));
    assert!(module.get(copy).is_none());
    assert!(module.users(source).is_empty());
    assert!(matches!(module.erase_op(copy), Err(IrError::StaleOp(op)) if op == copy));
    assert!(matches!(
        module.set_attr(copy, "tag", Attribute::Unit),
        Err(IrError::StaleOp(_))
    ));

    module.erase_op(func).expect("whole function goes");
    assert!(!module.is_value_live(source));
    assert!(func_names(&module).is_empty());
    verify(&module).expect("empty module verifies");
}

#[test]
fn replace_all_uses_moves_every_use() {
    let mut module = Module::new();
    let (func, copy) =
        add_copy_func(&mut module, "main", &[4], &[4], None, None).expect("build");
    let operands = module.op(copy).operands().to_vec();
    let (source, target) = (operands[0], operands[1]);

    let users = module
        .replace_all_uses_with(source, target)
        .expect("types are not checked by the module");
    assert_eq!(users, vec![copy]);
    assert_eq!(module.op(copy).operands(), &[target, target]);
    assert!(module.users(source).is_empty());
    assert_eq!(module.value(target).uses().len(), 2);
    assert!(module.replace_all_uses_with(target, target).expect("no-op").is_empty());
    assert_eq!(ops_in(&module, func, OpKind::Copy), vec![copy]);
}

#[test]
fn cloning_a_generic_remaps_its_operands_and_body() {
    let mut module = Module::new();
    let (func, copy) =
        add_copy_func(&mut module, "main", &[4], &[4], None, None).expect("build");
    let operands = module.op(copy).operands().to_vec();
    let generic = OpBuilder::new(&mut module, InsertPoint::Before(copy))
        .generic(
            vec![operands[0]],
            vec![operands[1]],
            vec![AffineMap::identity(1), AffineMap::identity(1)],
            vec![IteratorType::Parallel],
            Vec::new(),
            |b, args| {
                b.yield_values(vec![args[0]])?;
                Ok(())
            },
        )
        .expect("create generic");

    let mut mapping = IrMapping::new();
    mapping.map(operands[0], operands[1]);
    let cloned = module
        .clone_op(generic, &mut mapping, InsertPoint::After(generic))
        .expect("clone generic");

    assert_ne!(cloned, generic);
    assert_eq!(module.op(cloned).operands(), &[operands[1], operands[1]]);
    assert_eq!(
        module.op(cloned).attr(names::ITERATOR_TYPES),
        module.op(generic).attr(names::ITERATOR_TYPES)
    );
    let original_body = module.entry_block(generic, 0).expect("generic body");
    let cloned_body = module.entry_block(cloned, 0).expect("cloned body");
    assert_ne!(original_body, cloned_body);
    let cloned_yield = module.block(cloned_body).ops()[0];
    assert_eq!(
        module.op(cloned_yield).operands(),
        &[module.block(cloned_body).args()[0]]
    );
    assert_eq!(ops_in(&module, func, OpKind::Generic).len(), 2);
    verify(&module).expect("clone verifies");
}

#[test]
fn symbol_table_uniques_colliding_names() {
    let mut module = Module::new();
    let first = empty_func(&mut module, "kernel");
    let second = empty_func(&mut module, "kernel");
    let third = empty_func(&mut module, "kernel");
    let top = module.top();

    let mut table = SymbolTable::new(&module, top).expect("module is a symbol table");
    assert_eq!(table.len(), 1);
    assert_eq!(table.lookup("kernel"), Some(first));
    assert_eq!(table.insert(&mut module, first).expect("already known"), "kernel");
    assert_eq!(table.insert(&mut module, second).expect("renamed"), "kernel_0");
    assert_eq!(table.insert(&mut module, third).expect("renamed"), "kernel_1");
    assert_eq!(symbol_name(&module, third), Some("kernel_1"));
    assert_eq!(func_names(&module), vec!["kernel", "kernel_0", "kernel_1"]);
    verify(&module).expect("names are unique");
}

#[test]
fn symbol_table_rejects_foreign_operations() {
    let mut module = Module::new();
    let (func, copy) =
        add_copy_func(&mut module, "main", &[4], &[4], None, None).expect("build");
    let top = module.top();
    let mut table = SymbolTable::new(&module, top).expect("module is a symbol table");

    assert!(matches!(
        table.insert(&mut module, copy),
        Err(IrError::SymbolOutsideScope(OpKind::Copy))
    ));
    assert!(matches!(
        SymbolTable::new(&module, func),
        Err(IrError::NotSymbolTable(OpKind::Func))
    ));
}

#[test]
fn duplicate_symbols_fail_verification() {
    let mut module = Module::new();
    empty_func(&mut module, "main");
    empty_func(&mut module, "main");
    assert_eq!(
        verify(&module),
        Err(VerifyError::DuplicateSymbol("main".to_string()))
    );
}

#[test]
fn uses_before_definition_fail_verification() {
    let mut module = Module::new();
    let (_, copy) = add_copy_func(&mut module, "main", &[4], &[4], None, None).expect("build");
    let late = OpBuilder::new(&mut module, InsertPoint::After(copy))
        .alloc(memref(&[4]))
        .expect("create alloc");
    module.set_operand(copy, 0, late).expect("rewire source");

    assert_eq!(
        verify(&module),
        Err(VerifyError::Dominance {
            kind: OpKind::Copy,
            index: 0
        })
    );
}

#[test]
fn misplaced_terminator_fails_verification() {
    let mut module = Module::new();
    let (_, copy) = add_copy_func(&mut module, "main", &[4], &[4], None, None).expect("build");
    OpBuilder::new(&mut module, InsertPoint::Before(copy))
        .ret(Vec::new())
        .expect("create return");

    match verify(&module) {
        Err(VerifyError::Invalid { kind, reason }) => {
            assert_eq!(kind, OpKind::Return);
            assert!(reason.contains("last operation"), "{reason}");
        }
        other => panic!("unexpected verification result: {other:?}"),
    }
}

#[test]
fn printed_module_shows_kinds_attributes_and_types() {
    let mut module = Module::new();
    add_copy_func(&mut module, "main", &[8, 8], &[8, 8], None, None).expect("build");
    let text = module.to_string();

    assert!(text.starts_with("\"builtin.module\"()"), "{text}");
    assert!(text.contains("\"memref.copy\"("), "{text}");
    assert!(text.contains("sym_name = \"main\""), "{text}");
    assert!(text.contains("memref<8x8xf32>"), "{text}");
    assert!(text.contains("\"func.return\"()"), "{text}");
}

#[test]
fn function_types_are_stored_as_attributes() {
    let mut module = Module::new();
    let (func, _) = add_copy_func(&mut module, "main", &[2], &[2], None, None).expect("build");
    let Some(Type::Function(ty)) = module
        .op(func)
        .attr(names::FUNCTION_TYPE)
        .and_then(Attribute::as_type)
    else {
        panic!("function type attribute missing");
    };
    assert_eq!(ty.inputs.len(), 2);
    assert!(ty.results.is_empty());
}

#[test]
fn attributes_can_be_set_and_removed() {
    let mut module = Module::new();
    let func = empty_func(&mut module, "main");
    module
        .set_attr(func, "copy_anchor", Attribute::Unit)
        .expect("live op");
    assert_eq!(module.op(func).attr("copy_anchor"), Some(&Attribute::Unit));
    assert_eq!(
        module.remove_attr(func, "copy_anchor").expect("live op"),
        Some(Attribute::Unit)
    );
    assert_eq!(module.remove_attr(func, "copy_anchor").expect("live op"), None);
    assert!(module.op(func).attr("copy_anchor").is_none());
}

#[test]
fn journal_records_mutations_while_enabled() {
    let mut module = Module::new();
    let (_, copy) = add_copy_func(&mut module, "main", &[4], &[4], None, None).expect("build");
    let source = module.op(copy).operands()[0];

    module.begin_journal();
    assert!(module.take_journal().is_empty());
    let buffer = OpBuilder::new(&mut module, InsertPoint::Before(copy))
        .alloc(memref(&[4]))
        .expect("create alloc");
    let alloc = module.defining_op(buffer).expect("alloc op");
    module.set_operand(copy, 0, buffer).expect("rewire source");
    let changes = module.take_journal();
    assert_eq!(changes.created, vec![alloc]);
    assert_eq!(changes.modified, vec![copy]);
    assert_eq!(changes.released, vec![source]);
    assert!(changes.erased.is_empty());

    module.erase_op(copy).expect("copy has no results");
    let changes = module.take_journal();
    assert_eq!(changes.erased, vec![copy]);
    assert!(changes.released.contains(&buffer));

    module.end_journal();
    module.erase_op(alloc).expect("alloc is unused");
    assert!(module.take_journal().is_empty());
}
