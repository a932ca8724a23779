use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

const ADMIN_PASSWORD: &str = "kunci-admin";

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_laporand");
    let mut child = Command::new(exe)
        .env_remove("LAPORAND_CONFIG")
        .env_remove("LAPORAND_BACKEND")
        .env_remove("LAPORAND_WORKSPACE")
        .env("LAPORAND_ADMIN_PASSWORD", ADMIN_PASSWORD)
        .env("LAPORAND_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn laporand");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_value(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_value(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn photo() -> serde_json::Value {
    json!({ "fileName": "bukti.png", "mimeType": "image/png", "dataBase64": "aGVsbG8=" })
}

fn admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &std::path::Path) {
    request_ok(stdin, reader, "ws", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    request_ok(stdin, reader, "adm", "auth.adminLogin", json!({ "password": ADMIN_PASSWORD }));
}

fn create(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, username: &str, password: &str) {
    request_ok(
        stdin,
        reader,
        &format!("mk-{username}"),
        "users.create",
        json!({
            "username": username,
            "password": password,
            "name": format!("Siswa {username}"),
            "class": "X TKJ 3",
            "phone": "0812",
        }),
    );
}

fn find_user(list: &serde_json::Value, username: &str) -> Option<serde_json::Value> {
    list["users"]
        .as_array()
        .expect("users")
        .iter()
        .find(|u| u["username"] == username)
        .cloned()
}

#[test]
fn rename_onto_existing_username_fails_and_keeps_the_original() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    admin(&mut stdin, &mut reader, workspace.path());
    create(&mut stdin, &mut reader, "alice", "pw-a");
    create(&mut stdin, &mut reader, "bob", "pw-b");

    let dup = request(
        &mut stdin,
        &mut reader,
        "dup",
        "users.create",
        json!({ "username": "bob", "password": "x", "name": "Bob 2", "class": "X TKJ 1" }),
    );
    assert_eq!(error_code(&dup), "duplicate_key");

    let before = request_ok(&mut stdin, &mut reader, "l1", "users.list", json!({}));
    let clash = request(
        &mut stdin,
        &mut reader,
        "r1",
        "users.rename",
        json!({ "username": "alice", "newUsername": "bob", "patch": { "name": "Changed" } }),
    );
    assert_eq!(error_code(&clash), "duplicate_key");
    let after = request_ok(&mut stdin, &mut reader, "l2", "users.list", json!({}));
    assert_eq!(find_user(&before, "alice"), find_user(&after, "alice"));
    assert_eq!(find_user(&after, "bob").expect("bob")["name"], "Siswa bob");
    assert!(find_user(&after, "alice").expect("alice").get("passwordHash").is_none());

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "users.rename",
        json!({ "username": "alice", "newUsername": "alya" }),
    );
    assert_eq!(moved["user"]["username"], "alya");
    assert_eq!(moved["user"]["phone"], "0812");
    request_ok(&mut stdin, &mut reader, "in", "auth.login", json!({ "username": "alya", "password": "pw-a" }));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn blank_password_update_keeps_the_old_password() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    admin(&mut stdin, &mut reader, workspace.path());
    create(&mut stdin, &mut reader, "cici", "lama");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "users.update",
        json!({ "username": "cici", "patch": { "password": "", "class": "XI TKJ 1" } }),
    );
    assert_eq!(updated["user"]["class"], "XI TKJ 1");
    assert_eq!(updated["user"]["name"], "Siswa cici");

    request_ok(&mut stdin, &mut reader, "in", "auth.login", json!({ "username": "cici", "password": "lama" }));
    let mismatch = request(
        &mut stdin,
        &mut reader,
        "p1",
        "profile.update",
        json!({ "newPassword": "baru", "confirmPassword": "beda" }),
    );
    assert_eq!(error_code(&mismatch), "validation_error");
    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "profile.update",
        json!({ "newPassword": "baru", "confirmPassword": "baru", "phone": "0899" }),
    );
    assert_eq!(profile["user"]["phone"], "0899");
    let fresh = request_ok(&mut stdin, &mut reader, "p3", "profile.get", json!({}));
    assert_eq!(fresh["user"]["class"], "XI TKJ 1");

    let old = request(&mut stdin, &mut reader, "in2", "auth.login", json!({ "username": "cici", "password": "lama" }));
    assert_eq!(error_code(&old), "invalid_credentials");
    request_ok(&mut stdin, &mut reader, "in3", "auth.login", json!({ "username": "cici", "password": "baru" }));

    let as_student = request(&mut stdin, &mut reader, "st", "users.update", json!({ "username": "nobody" }));
    assert_eq!(error_code(&as_student), "forbidden");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn deleting_a_user_leaves_their_reports_untouched() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    admin(&mut stdin, &mut reader, workspace.path());
    create(&mut stdin, &mut reader, "dodi", "pw");

    request_ok(&mut stdin, &mut reader, "in", "auth.login", json!({ "username": "dodi", "password": "pw" }));
    let filed = request_ok(
        &mut stdin,
        &mut reader,
        "f",
        "facility.submit",
        json!({ "location": "Kantin", "category": "Meja", "description": "goyang", "photo": photo() }),
    );
    request_ok(&mut stdin, &mut reader, "d", "duty.submit", json!({ "photo": photo() }));

    request_ok(&mut stdin, &mut reader, "adm2", "auth.adminLogin", json!({ "password": ADMIN_PASSWORD }));
    let before = request_ok(&mut stdin, &mut reader, "l1", "facility.list", json!({}));
    let deleted = request_ok(&mut stdin, &mut reader, "del", "users.delete", json!({ "username": "dodi" }));
    assert_eq!(deleted["deleted"], true);
    let again = request_ok(&mut stdin, &mut reader, "del2", "users.delete", json!({ "username": "dodi" }));
    assert_eq!(again["deleted"], false);

    let after = request_ok(&mut stdin, &mut reader, "l2", "facility.list", json!({}));
    assert_eq!(before["reports"], after["reports"]);
    assert_eq!(after["reports"][0], filed["report"]);
    let duty = request_ok(&mut stdin, &mut reader, "l3", "duty.list", json!({}));
    assert_eq!(duty["reports"][0]["submitterUsername"], "dodi");

    let gone = request(&mut stdin, &mut reader, "in2", "auth.login", json!({ "username": "dodi", "password": "pw" }));
    assert_eq!(error_code(&gone), "invalid_credentials");

    drop(stdin);
    let _ = child.wait();
}
