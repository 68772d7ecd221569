use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::{tempdir, TempDir};

fn write_source(dir: &TempDir, name: &str, src: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, src).unwrap();
    path
}

fn have_toolchain() -> bool {
    let supported = cfg!(any(target_arch = "x86_64", target_arch = "aarch64"));
    if !supported || Command::new("cc").arg("--version").output().is_err() {
        eprintln!("skipping: needs an x86-64 or aarch64 host with `cc`");
        return false;
    }
    true
}

#[test]
fn help_shows_usage() {
    let mut cmd = Command::cargo_bin("mcc").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--arch"))
        .stdout(predicate::str::contains("--tacky"));
}

#[test]
fn dump_flags_print_stage_output() {
    let dir = tempdir().unwrap();
    let path = write_source(&dir, "t.c", "int main() { return 2 + 3; }\n");

    Command::cargo_bin("mcc")
        .unwrap()
        .arg("--lex")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Return"));

    Command::cargo_bin("mcc")
        .unwrap()
        .arg("--tacky")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Ret("));
}

#[test]
fn assembly_only_writes_the_s_file() {
    let dir = tempdir().unwrap();
    let path = write_source(&dir, "prog.c", "int g = 7;\nint main() { return g; }\n");

    Command::cargo_bin("mcc")
        .unwrap()
        .args(["-S", "--target", "linux", "--arch", "x86_64"])
        .arg(&path)
        .assert()
        .success();

    let asm = fs::read_to_string(dir.path().join("prog.s")).unwrap();
    assert!(asm.contains("\t.globl main\n"));
    assert!(asm.contains("g(%rip)"));
    assert!(asm.contains(".note.GNU-stack"));
}

#[test]
fn explicit_output_path_and_macos_target() {
    let dir = tempdir().unwrap();
    let path = write_source(&dir, "prog.c", "int main() { return 0; }\n");
    let out = dir.path().join("out.s");

    Command::cargo_bin("mcc")
        .unwrap()
        .args(["-S", "--target", "macos", "--arch", "x86_64", "-o"])
        .arg(&out)
        .arg(&path)
        .assert()
        .success();

    let asm = fs::read_to_string(&out).unwrap();
    assert!(asm.contains("_main:\n"));
    assert!(!dir.path().join("prog.s").exists());
}

#[test]
fn diagnostics_name_class_and_position() {
    let dir = tempdir().unwrap();
    let path = write_source(&dir, "bad.c", "int main() {\n  return y;\n}\n");

    Command::cargo_bin("mcc")
        .unwrap()
        .arg("-S")
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("bad.c:2:10: StaticError"))
        .stderr(predicate::str::contains("^"));
}

#[test]
fn unknown_target_is_rejected() {
    let dir = tempdir().unwrap();
    let path = write_source(&dir, "t.c", "int main() { return 0; }\n");

    Command::cargo_bin("mcc")
        .unwrap()
        .args(["-S", "--target", "windows"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown target"));

    Command::cargo_bin("mcc")
        .unwrap()
        .args(["-S", "--arch", "mips"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown architecture"));
}

#[test]
fn aarch64_assembly_for_both_targets() {
    let dir = tempdir().unwrap();
    let path = write_source(&dir, "prog.c", "int g = 7;\nint main() { return g; }\n");
    let linux = dir.path().join("linux.s");
    let mac = dir.path().join("mac.s");

    Command::cargo_bin("mcc")
        .unwrap()
        .args(["-S", "--target", "linux", "--arch", "aarch64", "-o"])
        .arg(&linux)
        .arg(&path)
        .assert()
        .success();
    let asm = fs::read_to_string(&linux).unwrap();
    assert!(asm.contains("\tstp x29, x30, [sp, #-16]!\n"));
    assert!(asm.contains(":lo12:g\n"));

    Command::cargo_bin("mcc")
        .unwrap()
        .args(["-S", "--target", "macos", "--arch", "arm64", "-o"])
        .arg(&mac)
        .arg(&path)
        .assert()
        .success();
    let asm = fs::read_to_string(&mac).unwrap();
    assert!(asm.contains("_main:\n"));
    assert!(asm.contains("_g@PAGE\n"));
}

#[test]
fn links_an_executable_with_cc() {
    if !have_toolchain() {
        return;
    }

    let dir = tempdir().unwrap();
    let path = write_source(
        &dir,
        "hello.c",
        "int main() { printf(\"hello, %d\\n\", 6 * 7); return 3; }\n",
    );

    Command::cargo_bin("mcc").unwrap().arg(&path).assert().success();

    Command::new(dir.path().join("hello"))
        .assert()
        .code(3)
        .stdout("hello, 42\n");
}

#[test]
fn linking_leaves_sibling_files_alone() {
    if !have_toolchain() {
        return;
    }

    let dir = tempdir().unwrap();
    let path = write_source(&dir, "prog.c", "int main() { return 5; }\n");
    let sibling = dir.path().join("prog.s");
    fs::write(&sibling, "hand-written assembly\n").unwrap();

    Command::cargo_bin("mcc").unwrap().arg(&path).assert().success();

    assert_eq!(
        fs::read_to_string(&sibling).unwrap(),
        "hand-written assembly\n"
    );
    Command::new(dir.path().join("prog")).assert().code(5);

    let object = dir.path().join("prog.o");
    Command::cargo_bin("mcc")
        .unwrap()
        .arg("-c")
        .arg(&path)
        .assert()
        .success();
    assert!(object.exists());
    assert_eq!(
        fs::read_to_string(&sibling).unwrap(),
        "hand-written assembly\n"
    );
}
