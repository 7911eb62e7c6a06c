//! Integration Tests

#[macro_use]
extern crate lazy_static;


use crate::workdir::WorkDir;

struct LineData<'a> {
    pub line: &'a str,
    pub stdout: &'a str,
    pub exit_status: i32,
}

lazy_static! {
    static ref SIMPLE_LINES: Vec<LineData<'static>> = vec![
        LineData { line: "echo test", stdout: "test\n", exit_status: 0 },
        LineData { line: "echo A | cat | cat", stdout: "A\n", exit_status: 0 },
        LineData { line: "echo needle | grep needle", stdout: "needle\n", exit_status: 0 },
        LineData { line: "false | true", stdout: "", exit_status: 0 },
        LineData { line: "true | false", stdout: "", exit_status: 1 },
        LineData { line: "exit 85", stdout: "", exit_status: 85 },
        LineData { line: "exit 500", stdout: "", exit_status: 244 },
        LineData { line: "exit -12", stdout: "", exit_status: 244 },
        LineData { line: "sh -c 'exit 7'", stdout: "", exit_status: 7 },
        LineData { line: "echo 'a | b' \"c  d\"", stdout: "a | b c  d\n", exit_status: 0 },
    ];
}

#[test]
fn test_simple_lines() {
    let wd = WorkDir::new("simple");
    for data in SIMPLE_LINES.iter() {
        let output = wd.run_line(data.line);
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            data.stdout,
            "stdout of {:?}",
            data.line
        );
        assert_eq!(
            output.status.code(),
            Some(data.exit_status),
            "status of {:?}",
            data.line
        );
    }
}

#[test]
fn test_unknown_command() {
    let wd = WorkDir::new("unknown");
    let output = wd.run_line("no-such-program-minibash-test");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no-such-program-minibash-test: command not found"),
        "{}",
        stderr
    );
}

#[test]
fn test_syntax_error() {
    let wd = WorkDir::new("syntax");
    let output = wd.run_line("echo 'oops");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("syntax error"));
}

#[test]
fn test_redirects_from_script() {
    let wd = WorkDir::new("redirects");
    let script = wd.create(
        "redirects.sh",
        "echo hi > f\n\
         cat < f > copy\n\
         echo again >> copy\n\
         ls missing-file 2> err\n\
         cat < copy\n",
    );

    let output = wd.output(&mut wd.command(&[&script]));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hi\nagain\n");
    assert_eq!(wd.read("f"), "hi\n");
    assert!(!wd.read("err").is_empty());
}

#[test]
fn test_missing_input_does_not_stop_the_script() {
    let wd = WorkDir::new("missing-input");
    let script = wd.create("script.sh", "cat < nowhere\necho after\n");

    let output = wd.command(&[&script]).output().unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout), "after\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("nowhere"));
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_background_job_then_fg() {
    let wd = WorkDir::new("background");
    let script = wd.create("script.sh", "sh -c 'sleep 1; exit 3' &\njobs -p\nfg %1\n");

    let output = wd.command(&[&script]).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3, "{}", stdout);
    // `[1] <pid>` is followed by the same pid from `jobs -p`.
    assert_eq!(lines[0], format!("[1] {}", lines[1]));
    assert_eq!(lines[2], "sh -c 'sleep 1; exit 3'");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_builtins() {
    let wd = WorkDir::new("builtins");
    let dir = wd.path().canonicalize().unwrap();
    let script = wd.create("script.sh", "cd /\npwd\ncd -\nfg\n");

    let output = wd.command(&[&script]).output().unwrap();
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        format!("/\n{}\n", dir.display())
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("fg: current: no such job"));
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_version() {
    let wd = WorkDir::new("version");
    let version: String = wd.stdout(&mut wd.command(&["--version"]));
    assert_eq!(version, format!("minibash version {}\n", env!("CARGO_PKG_VERSION")));
}
