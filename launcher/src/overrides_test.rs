use super::*;

fn tokens(raw: &[&str]) -> Vec<OverrideToken> {
    parse_all(raw.iter().copied()).unwrap()
}

#[test]
pub fn parse_splits_on_first_equals() {
    let token = OverrideToken::parse("model.name=a=b").unwrap();

    assert_eq!(token.key(), "model.name");
    assert_eq!(token.value(), "a=b");
    assert!(!token.is_launch());
}

#[test]
pub fn parse_rejects_malformed_tokens() {
    assert_eq!(
        OverrideToken::parse("lr"),
        Err(OverrideError::MissingSeparator("lr".to_string()))
    );
    assert_eq!(
        OverrideToken::parse("=0.1"),
        Err(OverrideError::EmptyKey("=0.1".to_string()))
    );
    assert!(parse_all(["lr=0.1", "oops"]).is_err());
}

#[test]
pub fn plain_tokens_pass_through() {
    let input = tokens(&["lr=0.01", "+extra=1", "name=\"two words\"", "fn=f(x)"]);
    let sanitized = sanitize(&input);

    assert_eq!(
        sanitized.task,
        vec!["lr=0.01", "+extra=1", "name=\"two words\"", "fn=f(x)"]
    );
    assert!(sanitized.launch.is_empty());
    assert_eq!(sanitized.joined(), "lr=0.01 +extra=1 name=\"two words\" fn=f(x)");
}

#[test]
pub fn brackets_are_escaped_in_rewritten_tokens() {
    let input = tokens(&[r"data.path=${oc.env:HOME}/(a)", r"expr=\{x\}"]);
    let sanitized = sanitize(&input);

    assert_eq!(
        sanitized.task,
        vec![
            r#"data.path="\\$\{oc.env:HOME\}/\(a\)""#,
            r#"expr="\{x\}""#,
        ]
    );
}

#[test]
pub fn backslashes_are_stripped() {
    let input = tokens(&[r"msg=a\ b\\c"]);

    assert_eq!(sanitize(&input).task, vec![r#"msg="a bc""#]);
}

#[test]
pub fn launch_overrides_follow_separator_in_order() {
    let input = tokens(&[
        "+launch.debug=true",
        "lr=0.1",
        "+launch/seed=7",
        "bs=32",
    ]);
    let args = sanitize(&input).into_args();

    assert_eq!(
        args,
        vec!["lr=0.1", "bs=32", "--", r#"debug="true""#, r#"seed="7""#]
    );
}

#[test]
pub fn no_separator_without_launch_overrides() {
    let input = tokens(&["lr=0.1", r"path=$HOME"]);
    let args = sanitize(&input).into_args();

    assert!(!args.iter().any(|arg| arg == ARGS_SEPARATOR));
    assert_eq!(args, vec!["lr=0.1", r#"path="\\$HOME""#]);
}

#[test]
pub fn take_script_removes_all_script_tokens() {
    let mut input = tokens(&[
        "lr=0.01",
        "+launch.script=/tmp/run.sh",
        "+launch.script=/tmp/other.sh",
        "+launch.debug=1",
    ]);

    assert_eq!(take_script(&mut input), Some("/tmp/run.sh".to_string()));
    assert_eq!(input, tokens(&["lr=0.01", "+launch.debug=1"]));

    let mut upsert = tokens(&["++launch.script=/tmp/upsert.sh", "lr=0.01"]);
    assert_eq!(take_script(&mut upsert), Some("/tmp/upsert.sh".to_string()));
    assert_eq!(upsert, tokens(&["lr=0.01"]));

    let mut without = tokens(&["lr=0.01"]);
    assert_eq!(take_script(&mut without), None);
    assert_eq!(without.len(), 1);
}

#[test]
pub fn tokens_deserialize_with_validation() {
    let parsed: Vec<OverrideToken> = serde_yaml::from_str("[a=1, +b=2]").unwrap();

    assert_eq!(parsed, tokens(&["a=1", "+b=2"]));
    assert!(serde_yaml::from_str::<Vec<OverrideToken>>("[a]").is_err());
}
