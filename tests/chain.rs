use delegate_function::{
    probe, Delegate, DelegateChain, DirectDelegate, Kwargs, ProcessDelegate, Value,
    WorkDirDelegate,
};
use serde_json::json;

fn direct_chain() -> Delegate {
    DelegateChain::new()
        .link(DirectDelegate::new())
        .build()
        .unwrap()
}

#[test]
fn direct_call_returns_and_mutates_in_place() {
    probe::register_builtins();
    let mut chain = direct_chain();
    let mut counter = probe::counter(0);

    let ret = chain
        .invoke(&mut counter, "set_value", vec![json!(7)], Kwargs::new())
        .unwrap();
    assert_eq!(ret, Value::Null);
    assert_eq!(counter.attr("value"), Some(&json!(7)));
}

#[test]
fn direct_call_runs_in_this_process() {
    probe::register_builtins();
    let mut chain = direct_chain();
    let mut target = probe::probe();

    let ret = chain
        .invoke(&mut target, "pid_and_host", Vec::new(), Kwargs::new())
        .unwrap();
    assert_eq!(ret[0], json!(std::process::id()));
}

#[test]
fn in_process_links_between_direct_links_are_transparent() {
    probe::register_builtins();
    let mut chain = DelegateChain::new()
        .link(DirectDelegate::new())
        .link(WorkDirDelegate::new())
        .link(DirectDelegate::new())
        .build()
        .unwrap();

    let mut counter = probe::counter(1);
    chain
        .invoke(&mut counter, "set_value", vec![json!(5)], Kwargs::new())
        .unwrap();
    assert_eq!(counter.attr("value"), Some(&json!(5)));
}

#[test]
fn marking_the_outer_link_interactive_reaches_every_link() {
    let mut chain = DelegateChain::new()
        .link(ProcessDelegate::new())
        .link(DirectDelegate::new())
        .build()
        .unwrap();
    assert!(!chain.interactive());
    assert!(!chain.subdelegate().unwrap().interactive());

    chain.make_interactive();
    assert!(chain.interactive());
    assert!(chain.subdelegate().unwrap().interactive());
}

#[test]
fn factory_builds_are_independent() {
    probe::register_builtins();
    let recipe = DelegateChain::new()
        .link(DirectDelegate::new())
        .link(DirectDelegate::new());

    let mut first = recipe.build().unwrap();
    let second = recipe.build().unwrap();
    let untouched = second.clone();

    let mut counter = probe::counter(0);
    first
        .invoke(&mut counter, "set_value", vec![json!(3)], Kwargs::new())
        .unwrap();
    assert_eq!(second, untouched);
}
