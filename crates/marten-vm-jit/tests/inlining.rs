//! Inlining-decider acceptance scenarios over a real function table and
//! profile.

use marten_vm_bytecode::{
    CallSiteId, CalleeCandidate, FunctionBody, FunctionId, FunctionTable,
};
use marten_vm_jit::inline::{CallSiteFacts, InlineFlags, InlineThresholds, InliningDecider};

fn caller(table: &mut FunctionTable, id: u32, sites: u16) -> std::sync::Arc<FunctionBody> {
    table.insert(
        FunctionBody::builder(FunctionId(id))
            .name(format!("caller_{id}"))
            .param_count(1)
            .instruction_count(100)
            .has_calls(true)
            .call_site_count(sites)
            .build(),
    )
}

fn small_callee(table: &mut FunctionTable, id: u32, size: u32) -> std::sync::Arc<FunctionBody> {
    table.insert(
        FunctionBody::builder(FunctionId(id))
            .name(format!("callee_{id}"))
            .param_count(1)
            .instruction_count(size)
            .build(),
    )
}

/// Scenario: a monomorphic call site whose callee has 10 countable
/// instructions, base threshold 60, no loops/polymorphism/constructor flags
/// — must accept.
#[test]
fn small_monomorphic_callee_is_accepted() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 1);
    small_callee(&mut table, 2, 10);
    top.profile()
        .record_call_target(CallSiteId(0), FunctionId(2), false);

    let mut decider = InliningDecider::new(
        &top,
        &table,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    assert!(decider.inline_into_top_func());
    assert_eq!(
        decider.inline_call_site(&top, CallSiteId(0), 0),
        Some(FunctionId(2))
    );
    assert_eq!(decider.inlined_bytecode(), 10);
}

/// Scenario: the same callee but containing a single loop, with the
/// with-loops cap already at its maximum — must reject without advancing the
/// inlined-bytecode counter.
#[test]
fn loop_callee_rejected_when_cap_hit() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 1);
    table.insert(
        FunctionBody::builder(FunctionId(2))
            .param_count(1)
            .instruction_count(10)
            .loop_count(1)
            .build(),
    );
    top.profile()
        .record_call_target(CallSiteId(0), FunctionId(2), false);

    let thresholds = InlineThresholds {
        max_inlinees_with_loops: 0,
        ..InlineThresholds::default()
    };
    let mut decider = InliningDecider::new(&top, &table, InlineFlags::default(), thresholds);
    assert_eq!(decider.inline_call_site(&top, CallSiteId(0), 0), None);
    assert_eq!(decider.inlined_bytecode(), 0);
}

/// Scenario: a constructor call site where the profile reports polymorphic
/// field access but the bytecode size exceeds the constructor threshold —
/// the escape overrides the size gate and the candidate is accepted.
#[test]
fn polymorphic_field_access_overrides_constructor_size_gate() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 1);
    let ctor = table.insert(
        FunctionBody::builder(FunctionId(2))
            .name("Ctor")
            .param_count(2)
            .instruction_count(50)
            .build(),
    );
    ctor.profile().record_polymorphic_field_access();
    top.profile()
        .record_call_target(CallSiteId(0), FunctionId(2), true);

    let thresholds = InlineThresholds {
        constructor_threshold: 21,
        ..InlineThresholds::default()
    };
    assert!(50 > thresholds.constructor_threshold);

    let mut decider = InliningDecider::new(&top, &table, InlineFlags::default(), thresholds);
    assert_eq!(
        decider.inline_call_site(&top, CallSiteId(0), 0),
        Some(FunctionId(2))
    );
}

/// Same constructor without the polymorphic-field-access evidence stays
/// rejected.
#[test]
fn oversized_constructor_without_evidence_is_rejected() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 1);
    small_callee(&mut table, 2, 50);
    top.profile()
        .record_call_target(CallSiteId(0), FunctionId(2), true);

    let mut decider = InliningDecider::new(
        &top,
        &table,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    assert_eq!(decider.inline_call_site(&top, CallSiteId(0), 0), None);
}

/// The cumulative inlined-bytecode budget stops user-function acceptance
/// unless inlining is force-enabled.
#[test]
fn budget_stops_acceptance_unless_forced() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 4);
    for id in 2..6 {
        small_callee(&mut table, id, 30);
        top.profile()
            .record_call_target(CallSiteId((id - 2) as u16), FunctionId(id), false);
    }

    let thresholds = InlineThresholds {
        max_inlined_bytecode: 60,
        ..InlineThresholds::default()
    };
    let mut decider = InliningDecider::new(&top, &table, InlineFlags::default(), thresholds.clone());
    let accepted: Vec<_> = (0..4)
        .filter_map(|s| decider.inline_call_site(&top, CallSiteId(s), 0))
        .collect();
    // 30 + 30 reaches the 60 budget; later sites are refused.
    assert_eq!(accepted.len(), 2);
    assert_eq!(decider.inlined_bytecode(), 60);

    let flags = InlineFlags {
        force_inline: true,
        ..InlineFlags::default()
    };
    let mut forced = InliningDecider::new(&top, &table, flags, thresholds);
    let accepted: Vec<_> = (0..4)
        .filter_map(|s| decider_accepts(&mut forced, &top, s))
        .collect();
    assert_eq!(accepted.len(), 4);
}

fn decider_accepts(
    decider: &mut InliningDecider<'_>,
    top: &FunctionBody,
    site: u16,
) -> Option<FunctionId> {
    decider.inline_call_site(top, CallSiteId(site), 0)
}

/// For a fixed profile and configuration the gate is deterministic: the same
/// candidate evaluated twice answers the same, because evaluation itself
/// never mutates decider state.
#[test]
fn acceptance_gate_is_deterministic() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 1);
    let callee = small_callee(&mut table, 2, 20);

    let decider = InliningDecider::new(
        &top,
        &table,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    let facts = CallSiteFacts::default();
    let first = decider.inline(&top, &callee, facts);
    let second = decider.inline(&top, &callee, facts);
    assert_eq!(first, second);
    assert!(first);
}

#[test]
fn top_function_with_try_region_disables_inlining() {
    let mut table = FunctionTable::new();
    let top = table.insert(
        FunctionBody::builder(FunctionId(1))
            .param_count(1)
            .instruction_count(100)
            .has_try(true)
            .build(),
    );
    let decider = InliningDecider::new(
        &top,
        &table,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    assert!(!decider.inline_into_top_func());
}

#[test]
fn structural_rejections_fire_in_the_ladder() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 0);
    let decider = InliningDecider::new(
        &top,
        &table,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    let facts = CallSiteFacts::default();

    let lazy = FunctionBody::builder(FunctionId(10))
        .param_count(1)
        .is_lazy(true)
        .build();
    assert!(!decider.inline(&top, &lazy, facts));

    let with_try = FunctionBody::builder(FunctionId(11))
        .param_count(1)
        .instruction_count(5)
        .has_try(true)
        .build();
    assert!(!decider.inline(&top, &with_try, facts));

    let global = FunctionBody::builder(FunctionId(12))
        .instruction_count(5)
        .build();
    assert!(!decider.inline(&top, &global, facts));

    let excluded = FunctionBody::builder(FunctionId(13))
        .param_count(1)
        .instruction_count(5)
        .dont_inline(true)
        .build();
    assert!(!decider.inline(&top, &excluded, facts));

    let too_many_params = FunctionBody::builder(FunctionId(14))
        .param_count(16)
        .instruction_count(5)
        .build();
    assert!(!decider.inline(&top, &too_many_params, facts));

    // A class constructor invoked without `new` always throws.
    let class_ctor = FunctionBody::builder(FunctionId(15))
        .param_count(1)
        .instruction_count(5)
        .is_class_constructor(true)
        .build();
    assert!(!decider.inline(&top, &class_ctor, facts));
    assert!(decider.inline(
        &top,
        &class_ctor,
        CallSiteFacts {
            is_constructor: true,
            ..facts
        }
    ));
}

#[test]
fn direct_recursion_bounded_by_depth() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 0);

    let thresholds = InlineThresholds {
        max_recursive_depth: 2,
        ..InlineThresholds::default()
    };
    let decider = InliningDecider::new(&top, &table, InlineFlags::default(), thresholds);

    let shallow = CallSiteFacts {
        recursive_depth: 1,
        ..CallSiteFacts::default()
    };
    assert!(decider.inline(&top, &top, shallow));

    let deep = CallSiteFacts {
        recursive_depth: 2,
        ..CallSiteFacts::default()
    };
    assert!(!decider.inline(&top, &top, deep));
}

#[test]
fn partial_polymorphic_rejected_inside_loop_bodies() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 1);
    small_callee(&mut table, 2, 10);
    // Oversized for the polymorphic threshold; only function 2 qualifies.
    small_callee(&mut table, 3, 300);
    for id in [2u32, 3] {
        top.profile()
            .record_call_target(CallSiteId(0), FunctionId(id), false);
    }
    let candidates: Vec<CalleeCandidate> = top
        .profile()
        .polymorphic_call_site_info(CallSiteId(0))
        .expect("polymorphic site");

    // Outside a loop body, partial inlining of the qualifying subset is fine.
    let mut accepted = [false; 4];
    let mut decider = InliningDecider::new(
        &top,
        &table,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    let count =
        decider.inline_polymorphic_call_site(&top, CallSiteId(0), &candidates, &mut accepted);
    assert_eq!(count, 1);
    assert!(accepted[0]);
    assert!(!accepted[1]);

    // Inside a loop-body compile the partial mode is off: all or nothing.
    let flags = InlineFlags {
        loop_body_compile: true,
        ..InlineFlags::default()
    };
    let mut accepted = [false; 4];
    let mut decider = InliningDecider::new(&top, &table, flags, InlineThresholds::default());
    let count =
        decider.inline_polymorphic_call_site(&top, CallSiteId(0), &candidates, &mut accepted);
    assert_eq!(count, 0);
    assert!(!accepted[0]);
}

#[test]
fn fully_qualifying_polymorphic_site_accepts_all() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 1);
    small_callee(&mut table, 2, 10);
    small_callee(&mut table, 3, 12);
    for id in [2u32, 3] {
        top.profile()
            .record_call_target(CallSiteId(0), FunctionId(id), false);
    }
    let candidates = top
        .profile()
        .polymorphic_call_site_info(CallSiteId(0))
        .expect("polymorphic site");

    let mut accepted = [false; 4];
    let mut decider = InliningDecider::new(
        &top,
        &table,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    let count =
        decider.inline_polymorphic_call_site(&top, CallSiteId(0), &candidates, &mut accepted);
    assert_eq!(count, 2);
    assert!(accepted[0] && accepted[1]);
    assert_eq!(decider.inlined_bytecode(), 22);
}

#[test]
fn constant_arg_escape_accepts_branchy_callee() {
    let mut table = FunctionTable::new();
    let top = caller(&mut table, 1, 1);
    // Too big for every ordinary threshold, small enough for the
    // constant-argument one.
    let callee = small_callee(&mut table, 2, 120);
    callee.profile().record_branch_arg(0);
    top.profile()
        .record_call_target(CallSiteId(0), FunctionId(2), false);
    top.profile().record_constant_arg(CallSiteId(0), 0);

    let mut decider = InliningDecider::new(
        &top,
        &table,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    assert_eq!(
        decider.inline_call_site(&top, CallSiteId(0), 0),
        Some(FunctionId(2))
    );

    // Without the constant argument the same callee is too big.
    let mut table2 = FunctionTable::new();
    let top2 = caller(&mut table2, 1, 1);
    let callee2 = small_callee(&mut table2, 2, 120);
    callee2.profile().record_branch_arg(0);
    top2.profile()
        .record_call_target(CallSiteId(0), FunctionId(2), false);

    let mut decider2 = InliningDecider::new(
        &top2,
        &table2,
        InlineFlags::default(),
        InlineThresholds::default(),
    );
    assert_eq!(decider2.inline_call_site(&top2, CallSiteId(0), 0), None);
}
