use std::{fs, path::Path, process::Command};

use mcc::{compile, Options};

struct Run {
    stdout: String,
    status: i32,
}

fn have_toolchain() -> bool {
    if !cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
        eprintln!("skipping: generated code targets x86-64 and aarch64");
        return false;
    }
    if Command::new("cc").arg("--version").output().is_err() {
        eprintln!("skipping: no `cc` found to assemble and link");
        return false;
    }
    true
}

fn compile_and_run(src: &str) -> Run {
    let dir = tempfile::tempdir().unwrap();
    let asm_path = dir.path().join("prog.s");
    let exe_path = dir.path().join("prog");

    let asm = compile(src, &Options::default()).unwrap();
    fs::write(&asm_path, asm).unwrap();

    let status = Command::new("cc")
        .arg(&asm_path)
        .arg("-o")
        .arg(&exe_path)
        .status()
        .unwrap();
    assert!(status.success(), "cc failed to assemble the output");

    let output = Command::new(&exe_path).output().unwrap();
    Run {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        status: output.status.code().unwrap_or(-1),
    }
}

fn run_fixture(name: &str) -> Run {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/c")
        .join(name);
    compile_and_run(&fs::read_to_string(path).unwrap())
}

fn check_assertions(run: &Run, expected_count: usize) {
    let results: Vec<&str> = run
        .stdout
        .lines()
        .filter(|line| line.contains(", OK") || line.contains("but got"))
        .collect();

    for line in &results {
        assert!(line.ends_with(", OK"), "assertion failed: {}", line);
    }
    assert_eq!(results.len(), expected_count, "stdout:\n{}", run.stdout);
    assert_eq!(run.status, 0);
}

#[test]
fn expr_c_passes_every_assertion() {
    if !have_toolchain() {
        return;
    }
    let run = run_fixture("expr.c");
    check_assertions(&run, 24);
    assert!(run.stdout.starts_with("1: 0, OK\n2: 42, OK\n3: -7, OK\n"));
}

#[test]
fn functions_c_passes_every_assertion() {
    if !have_toolchain() {
        return;
    }
    let run = run_fixture("functions.c");
    check_assertions(&run, 36);
    assert!(run.stdout.contains(": 1836311903, OK\n"));
    assert!(run.stdout.contains(": 76, OK\n"));
}

#[test]
fn test_c_passes_every_assertion() {
    if !have_toolchain() {
        return;
    }
    let run = run_fixture("test.c");
    check_assertions(&run, 12);
}

#[test]
fn exit_status_comes_from_main() {
    if !have_toolchain() {
        return;
    }
    let run = compile_and_run("int main() { int a[3]; a[1] = 40; return a[1] + 2; }");
    assert_eq!(run.status, 42);
}

#[test]
fn calls_with_stack_arguments_and_deep_recursion() {
    if !have_toolchain() {
        return;
    }
    let src = r#"
        int sum8(int a, int b, int c, int d, int e, int f, int g, int h) {
            return a - b + c - d + e - f + g * h;
        }
        int depth(int n) {
            if (n == 0) return 0;
            return 1 + depth(n - 1);
        }
        int main() {
            printf("%d %d\n", sum8(1, 2, 3, 4, 5, 6, 7, 8), depth(10000));
            return 0;
        }
    "#;
    let run = compile_and_run(src);
    assert_eq!(run.stdout, "53 10000\n");
    assert_eq!(run.status, 0);
}

#[test]
fn strings_and_char_arrays() {
    if !have_toolchain() {
        return;
    }
    let src = r#"
        char greeting[3] = "hi";
        int main() {
            char word[6] = "there";
            char *p = word;
            printf("%s %s %c\n", greeting, p, *(p + 1));
            return sizeof greeting + sizeof word;
        }
    "#;
    let run = compile_and_run(src);
    assert_eq!(run.stdout, "hi there h\n");
    assert_eq!(run.status, 9);
}
