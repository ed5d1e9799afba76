//! Integration tests for installs from source control

mod common;

use appstore::services::{InstallTarget, RestartType, Stage, StageStatus};
use common::{CondaInstall, FakeTools, TestEnv};

fn repository(branch: &str) -> InstallTarget {
    InstallTarget::Repository {
        url: "https://git.example.com/lab/repo_app.git".to_string(),
        branch: branch.to_string(),
    }
}

#[tokio::test]
async fn test_fresh_clone_installs_and_restarts() {
    let env = TestEnv::new();

    let (id, handle) = env.state.installer.begin_install(repository("dev"), false).unwrap();
    assert!(handle.join().await);

    assert_eq!(
        env.calls("git"),
        vec![
            "init",
            "remote add origin https://git.example.com/lab/repo_app.git",
            "fetch origin",
            "checkout dev",
        ]
    );

    let record = env.record(&id);
    assert!(record.install_complete);
    assert_eq!(record.workspace_path, env.git_dir().join("repo_app"));
    assert!(record.workspace_path.join("install.yml").is_file());

    let restarts = env.host.requests();
    assert_eq!(restarts.len(), 1);
    assert_eq!(restarts[0].restart_type, RestartType::GithubInstall);
    assert_eq!(restarts[0].name, "repo_app");
}

#[tokio::test]
async fn test_missing_branch_falls_back_to_main() {
    let env = TestEnv::new();

    let (id, handle) = env.state.installer.begin_install(repository("missing"), false).unwrap();
    assert!(handle.join().await);

    let calls = env.calls("git");
    assert_eq!(&calls[calls.len() - 2..], ["checkout missing", "checkout main"]);
    assert!(env.record(&id).install_complete);

    let log = env.state.ledger().read_log(&id).unwrap();
    assert!(log.contains("falling back to 'main'"));
}

#[tokio::test]
async fn test_existing_checkout_is_pulled() {
    let env = TestEnv::new();
    let workspace = env.git_dir().join("repo_app");
    env.write_manifest(&workspace, "name: repo_app\n");

    let (id, handle) = env.state.installer.begin_install(repository("dev"), false).unwrap();
    assert!(handle.join().await);

    assert_eq!(env.calls("git"), vec!["pull origin dev"]);
    assert!(env.record(&id).install_complete);
}

#[tokio::test]
async fn test_declared_conda_dependencies_gate_the_fetch_stage() {
    let env = TestEnv::with_tools(FakeTools {
        conda_install: CondaInstall::NotFound,
        ..FakeTools::default()
    });
    let workspace = env.git_dir().join("repo_app");
    env.write_manifest(
        &workspace,
        "name: repo_app\nrequirements:\n  conda:\n    channels: [lab]\n    packages: [numpy]\n",
    );

    let (id, handle) = env.state.installer.begin_install(repository("dev"), false).unwrap();
    assert!(handle.join().await);

    assert_eq!(env.calls("conda"), vec!["install --yes -c lab numpy"]);
    let record = env.record(&id);
    assert_eq!(record.stage(Stage::Conda), StageStatus::False);
    assert_eq!(record.stage(Stage::Pip), StageStatus::Pending);
    assert!(record.error_message.unwrap().contains("package not found"));
    assert!(env.host.requests().is_empty());
}

#[tokio::test]
async fn test_failed_clone_leaves_no_workspace_behind() {
    let env = TestEnv::with_tools(FakeTools {
        git_fetch_exit: 128,
        ..FakeTools::default()
    });
    let workspace = env.git_dir().join("repo_app");

    let (first, handle) = env.state.installer.begin_install(repository("dev"), false).unwrap();
    assert!(handle.join().await);
    assert_eq!(env.record(&first).stage(Stage::Conda), StageStatus::False);
    assert!(!workspace.exists());

    // The retry clones from scratch instead of pulling the broken directory
    let (second, handle) = env.state.installer.begin_install(repository("dev"), false).unwrap();
    assert!(handle.join().await);
    assert_eq!(env.record(&second).stage(Stage::Conda), StageStatus::False);

    let calls = env.calls("git");
    assert_eq!(calls.iter().filter(|c| c.as_str() == "init").count(), 2);
    assert!(!calls.iter().any(|c| c.starts_with("pull")));
    assert!(!calls.iter().any(|c| c.starts_with("checkout")));
    assert!(!workspace.exists());
    assert!(env.host.requests().is_empty());
}
