//! End-to-end action scenarios: parse a raw model response, execute it in a
//! real workspace, observe the result.

use std::fs;

use eltbench::{Action, Controller, parse_action};
use pretty_assertions::assert_eq;

#[test]
fn shell_action_lists_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("only-file.txt"), "x").unwrap();

    let action = parse_action(r#"Bash(code="ls -l")"#).unwrap();
    assert_eq!(
        action,
        Action::Bash {
            code: "ls -l".to_string()
        }
    );

    let mut controller = Controller::new(dir.path()).unwrap();
    let (observation, done) = controller.step(&action);
    assert!(!done);
    assert!(observation.contains("only-file.txt"), "{observation}");
}

#[test]
fn create_file_writes_then_reports_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = Controller::new(dir.path()).unwrap();

    let text = "CreateFile(filepath=\"/workspace/out.csv\"):\n```\na,b\n1,2\n```";
    let action = parse_action(text).unwrap();
    assert_eq!(
        action,
        Action::CreateFile {
            filepath: "out.csv".to_string(),
            content: "a,b\n1,2".to_string(),
        }
    );

    let (observation, done) = controller.step(&action);
    assert!(!done);
    assert!(observation.contains("created and written successfully"), "{observation}");
    assert_eq!(fs::read_to_string(dir.path().join("out.csv")).unwrap(), "a,b\n1,2");

    // A second identical action must not overwrite anything.
    let (observation, _) = controller.step(&action);
    assert!(observation.contains("already exists"), "{observation}");
    assert_eq!(fs::read_to_string(dir.path().join("out.csv")).unwrap(), "a,b\n1,2");
}

#[test]
fn terminate_is_done_regardless_of_prior_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = Controller::new(dir.path()).unwrap();

    controller.step(&Action::Bash {
        code: "mkdir sub".to_string(),
    });
    controller.step(&Action::Bash {
        code: "cd sub".to_string(),
    });

    let (observation, done) = controller.step(&Action::Terminate {
        output: "finished".to_string(),
    });
    assert!(done);
    assert_eq!(observation, "Terminate");
}

#[test]
fn edit_after_create_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = Controller::new(dir.path()).unwrap();

    let create = parse_action("CreateFile(filepath=\"sql/orders.sql\"):\n```sql\nSELECT 1\n```").unwrap();
    let (observation, _) = controller.step(&create);
    assert!(observation.contains("created"), "{observation}");

    let edit = parse_action("EditFile(filepath=\"sql/orders.sql\"):\n```sql\nSELECT 2\n```").unwrap();
    let (observation, _) = controller.step(&edit);
    assert!(observation.contains("edited successfully"), "{observation}");
    assert_eq!(
        fs::read_to_string(dir.path().join("sql/orders.sql")).unwrap(),
        "SELECT 2"
    );
}
