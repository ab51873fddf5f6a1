use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use preview_build::{BuildEngine, BuildError, Subprocesses};
use preview_core::{BuildStatus, CommitSha, Config, RefName};
use tempfile::TempDir;

/// Runs through `Subprocesses` so cycles reaping in parallel tests never
/// collect these children.
fn git(dir: &Path, args: &[&str]) -> String {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .args(["-c", "user.name=Preview Test", "-c", "user.email=test@example.invalid"])
        .args(args);
    let out = Subprocesses::new()
        .run(&mut cmd, Duration::from_secs(60))
        .expect("run git");
    assert!(out.success(), "git {args:?} failed: {}", out.output);
    out.output.trim().to_string()
}

fn write_executable(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod");
}

/// Upstream repository plus everything the engine needs around it.
struct Fixture {
    tmp: TempDir,
    upstream: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tmp");
        let upstream = tmp.path().join("upstream");
        fs::create_dir_all(&upstream).expect("mkdir upstream");
        git(&upstream, &["init", "--quiet", "--initial-branch=main"]);

        // Each generation step run appends one line to steps.log.
        let steps_log = tmp.path().join("steps.log");
        write_executable(
            &upstream.join("scripts/generate.sh"),
            &format!("echo \"$(git rev-parse HEAD)\" >> {}", steps_log.display()),
        );
        fs::write(upstream.join("mkdocs.yml"), "site_name: preview\n").expect("mkdocs.yml");

        // The fake site generator stamps the built commit into index.html.
        write_executable(
            &tmp.path().join("bin/mkdocs"),
            r#"site=""
while [ $# -gt 0 ]; do
  case "$1" in
    --site-dir) site="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$site"
git rev-parse HEAD > "$site/index.html""#,
        );

        let fixture = Self { tmp, upstream };
        fixture.commit("main", "index.md", "# main\n");
        fixture
    }

    fn config(&self) -> Config {
        Config {
            work_path: self.tmp.path().join("work"),
            build_root: self.tmp.path().join("builds"),
            state_file: self.tmp.path().join("state/build_state.json"),
            remote_url: self.upstream.display().to_string(),
            generation_steps: vec![PathBuf::from("scripts/generate.sh")],
            site_generator: self.tmp.path().join("bin/mkdocs").display().to_string(),
            secret: "s3cret".to_string(),
            step_timeout_secs: 60,
            git_timeout_secs: 60,
            ..Config::default()
        }
    }

    fn engine(&self) -> BuildEngine {
        BuildEngine::new(self.config())
    }

    /// Commit a file on `branch` (created from main when missing).
    fn commit(&self, branch: &str, file: &str, contents: &str) -> CommitSha {
        let exists = !git(&self.upstream, &["branch", "--list", branch]).is_empty();
        if exists {
            git(&self.upstream, &["checkout", "--quiet", branch]);
        } else if branch != "main" {
            git(&self.upstream, &["checkout", "--quiet", "-b", branch, "main"]);
        }
        fs::write(self.upstream.join(file), contents).expect("write file");
        git(&self.upstream, &["add", "-A"]);
        git(&self.upstream, &["commit", "--quiet", "-m", file]);
        let sha = git(&self.upstream, &["rev-parse", "HEAD"]);
        git(&self.upstream, &["checkout", "--quiet", "main"]);
        CommitSha::parse(sha).expect("sha")
    }

    fn output(&self, branch: &str) -> PathBuf {
        self.tmp.path().join("builds").join(branch)
    }

    fn built_commit(&self, branch: &str) -> String {
        fs::read_to_string(self.output(branch).join("index.html"))
            .expect("index.html")
            .trim()
            .to_string()
    }

    fn step_runs(&self) -> usize {
        fs::read_to_string(self.tmp.path().join("steps.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}

#[test]
fn first_cycle_builds_every_branch() {
    let fixture = Fixture::new();
    let main = CommitSha::parse(git(&fixture.upstream, &["rev-parse", "main"])).expect("sha");
    let feat = fixture.commit("feat", "feat.md", "# feat\n");

    let engine = fixture.engine();
    let summary = engine.run_cycle().expect("cycle");

    assert!(summary.fetched);
    let built: Vec<&str> = summary.reconcile.built.iter().map(RefName::as_str).collect();
    assert_eq!(built, vec!["origin/feat", "origin/main"]);
    assert!(summary.reconcile.failed.is_empty());

    assert_eq!(fixture.built_commit("origin/main"), main.as_str());
    assert_eq!(fixture.built_commit("origin/feat"), feat.as_str());
    assert_eq!(fixture.step_runs(), 2);

    let state = engine.store().load().expect("load");
    let entry = state.get(&RefName::from("origin/feat")).expect("feat entry");
    assert_eq!(entry.status, BuildStatus::Built);
    assert_eq!(entry.built.as_ref(), Some(&feat));
    assert_eq!(entry.sha, feat);
    assert!(entry.built_at.is_some());
}

#[test]
fn unchanged_second_cycle_runs_nothing() {
    let fixture = Fixture::new();
    fixture.commit("feat", "feat.md", "# feat\n");
    let engine = fixture.engine();
    engine.run_cycle().expect("first cycle");
    let state_before = fs::read_to_string(&fixture.config().state_file).expect("state");
    let runs_before = fixture.step_runs();

    let summary = engine.run_cycle().expect("second cycle");

    assert!(summary.reconcile.built.is_empty());
    assert_eq!(summary.reconcile.up_to_date.len(), 2);
    assert_eq!(fixture.step_runs(), runs_before, "no generation step ran");
    assert_eq!(
        fs::read_to_string(&fixture.config().state_file).expect("state"),
        state_before
    );
}

#[test]
fn new_commit_rebuilds_only_that_branch() {
    let fixture = Fixture::new();
    fixture.commit("feat", "feat.md", "# feat\n");
    let engine = fixture.engine();
    engine.run_cycle().expect("first cycle");

    let next = fixture.commit("feat", "feat.md", "# feat v2\n");
    let summary = engine.run_cycle().expect("second cycle");

    let built: Vec<&str> = summary.reconcile.built.iter().map(RefName::as_str).collect();
    assert_eq!(built, vec!["origin/feat"]);
    assert_eq!(fixture.built_commit("origin/feat"), next.as_str());
}

#[test]
fn missing_output_directory_forces_rebuild() {
    let fixture = Fixture::new();
    let engine = fixture.engine();
    engine.run_cycle().expect("first cycle");
    fs::remove_dir_all(fixture.output("origin/main")).expect("remove output");

    let summary = engine.run_cycle().expect("second cycle");

    assert_eq!(summary.reconcile.built, vec![RefName::from("origin/main")]);
    assert!(fixture.output("origin/main").join("index.html").exists());
}

#[test]
fn deleted_branch_is_pruned_but_state_entry_kept() {
    let fixture = Fixture::new();
    fixture.commit("feat", "feat.md", "# feat\n");
    let engine = fixture.engine();
    engine.run_cycle().expect("first cycle");
    assert!(fixture.output("origin/feat").is_dir());

    git(&fixture.upstream, &["branch", "--quiet", "-D", "feat"]);
    let summary = engine.run_cycle().expect("second cycle");

    assert!(!fixture.output("origin/feat").exists());
    assert!(fixture.output("origin/main").is_dir());
    let pruned = summary.reconcile.pruned.expect("prune enabled");
    assert_eq!(pruned.removed, vec![fixture.output("origin/feat")]);
    let state = engine.store().load().expect("load");
    assert!(state.get(&RefName::from("origin/feat")).is_some());
}

#[test]
fn pruning_can_be_disabled() {
    let fixture = Fixture::new();
    let stray = fixture.output("origin/gone");
    fs::create_dir_all(&stray).expect("stray dir");

    let engine = BuildEngine::new(Config {
        prune: false,
        ..fixture.config()
    });
    let summary = engine.run_cycle().expect("cycle");

    assert!(summary.reconcile.pruned.is_none());
    assert!(stray.is_dir());
}

#[test]
fn pushed_commit_resolves_and_builds_in_isolation() {
    let fixture = Fixture::new();
    fixture.commit("feat", "feat.md", "# feat\n");
    let engine = fixture.engine();
    engine.run_cycle().expect("first cycle");

    let pushed = fixture.commit("feat", "feat.md", "# pushed\n");
    let branch = engine.resolve_commit(&pushed).expect("resolve");
    assert_eq!(branch.name.as_str(), "origin/feat");

    let report = engine.build_commit(&pushed, &branch.name).expect("build commit");
    assert_eq!(report.failed_steps(), 0);
    assert_eq!(fixture.built_commit("origin/feat"), pushed.as_str());

    let state = engine.store().load().expect("load");
    let entry = state.get(&branch.name).expect("entry");
    assert_eq!(entry.built.as_ref(), Some(&pushed));

    // The shared tree was never checked out at the pushed commit.
    let head = git(&fixture.config().work_path, &["rev-parse", "HEAD"]);
    assert_ne!(head, pushed.as_str());

    // Already built, so the next cycle has nothing to do for feat.
    let summary = engine.run_cycle().expect("cycle");
    assert!(summary.reconcile.built.is_empty());
}

#[test]
fn unknown_commit_is_not_resolved() {
    let fixture = Fixture::new();
    let engine = fixture.engine();
    let unknown = CommitSha::parse("f".repeat(40)).expect("sha");
    let err = engine.resolve_commit(&unknown).unwrap_err();
    assert!(matches!(err, BuildError::BranchNotFound { .. }), "got {err}");
}

#[test]
fn fetch_failure_falls_back_to_known_refs() {
    let fixture = Fixture::new();
    fixture.engine().run_cycle().expect("first cycle");

    let engine = BuildEngine::new(Config {
        remote_url: fixture.tmp.path().join("missing-upstream").display().to_string(),
        ..fixture.config()
    });
    let summary = engine.run_cycle().expect("cycle despite fetch failure");

    assert!(!summary.fetched);
    assert_eq!(summary.refs.len(), 1);
    assert_eq!(summary.reconcile.up_to_date, vec![RefName::from("origin/main")]);
}

#[test]
fn failing_checkout_leaves_entry_untouched() {
    let fixture = Fixture::new();
    let engine = fixture.engine();
    engine.run_cycle().expect("first cycle");
    let before = engine.store().load().expect("load");

    // A commit the mirror has never fetched cannot be checked out.
    let unknown = CommitSha::parse("e".repeat(40)).expect("sha");
    let err = engine
        .build_commit(&unknown, &RefName::from("origin/main"))
        .unwrap_err();

    assert!(matches!(err, BuildError::Checkout { .. }), "got {err}");
    assert_eq!(engine.store().load().expect("load"), before);
}

#[test]
fn failed_fetch_on_fresh_mirror_keeps_published_previews() {
    let fixture = Fixture::new();
    let published = fixture.output("origin/main");
    fs::create_dir_all(&published).expect("output dir");
    fs::write(published.join("index.html"), "live\n").expect("index.html");

    let engine = BuildEngine::new(Config {
        remote_url: fixture.tmp.path().join("missing-upstream").display().to_string(),
        ..fixture.config()
    });
    let summary = engine.run_cycle().expect("cycle despite fetch failure");

    assert!(!summary.fetched);
    assert!(summary.refs.is_empty());
    assert!(summary.reconcile.pruned.is_none());
    assert_eq!(
        fs::read_to_string(published.join("index.html")).expect("index.html"),
        "live\n"
    );
}

#[test]
fn fallback_refs_never_prune() {
    let fixture = Fixture::new();
    fixture.engine().run_cycle().expect("first cycle");
    let stray = fixture.output("origin/gone");
    fs::create_dir_all(&stray).expect("stray dir");

    let engine = BuildEngine::new(Config {
        remote_url: fixture.tmp.path().join("missing-upstream").display().to_string(),
        ..fixture.config()
    });
    let summary = engine.run_cycle().expect("cycle");

    assert!(!summary.fetched);
    assert!(summary.reconcile.pruned.is_none());
    assert!(stray.is_dir());
}

/// Site generator that fails whenever the checkout contains `broken.md`.
fn picky_config(fixture: &Fixture) -> Config {
    let picky = fixture.tmp.path().join("bin/picky-mkdocs");
    write_executable(
        &picky,
        &format!(
            "if [ -f broken.md ]; then echo broken page >&2; exit 1; fi\nexec {} \"$@\"",
            fixture.tmp.path().join("bin/mkdocs").display()
        ),
    );
    Config {
        site_generator: picky.display().to_string(),
        require_site_build_success: true,
        ..fixture.config()
    }
}

#[test]
fn failing_later_ref_keeps_earlier_refs_persisted() {
    let fixture = Fixture::new();
    let main = CommitSha::parse(git(&fixture.upstream, &["rev-parse", "main"])).expect("sha");
    let topic = fixture.commit("topic", "broken.md", "# broken\n");

    let engine = BuildEngine::new(picky_config(&fixture));
    let summary = engine.run_cycle().expect("cycle");

    assert_eq!(summary.reconcile.built, vec![RefName::from("origin/main")]);
    assert_eq!(summary.reconcile.failed.len(), 1);
    assert_eq!(summary.reconcile.failed[0].0, RefName::from("origin/topic"));

    // Read the file directly, not through the engine.
    let on_disk: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(&fixture.config().state_file).expect("state file"),
    )
    .expect("state json");
    assert_eq!(on_disk["origin/main"]["status"], "built");
    assert_eq!(on_disk["origin/main"]["built"], main.as_str());
    assert_eq!(on_disk["origin/topic"]["status"], "init");
    assert_eq!(on_disk["origin/topic"]["sha"], topic.as_str());
    assert!(on_disk["origin/topic"]["built"].is_null());
}

#[test]
fn moved_branch_records_tip_until_it_builds() {
    let fixture = Fixture::new();
    let first = fixture.commit("feat", "feat.md", "# feat\n");
    let engine = BuildEngine::new(picky_config(&fixture));
    engine.run_cycle().expect("first cycle");

    let moved = fixture.commit("feat", "broken.md", "# broken\n");
    let summary = engine.run_cycle().expect("second cycle");
    assert_eq!(summary.reconcile.failed.len(), 1);

    let state = engine.store().load().expect("load");
    let entry = state.get(&RefName::from("origin/feat")).expect("feat entry");
    assert_eq!(entry.status, BuildStatus::Built);
    assert_eq!(entry.built.as_ref(), Some(&first));
    assert_eq!(entry.sha, moved, "latest tip is recorded");
    assert!(!entry.is_built_at(&entry.sha));
    assert_eq!(fixture.built_commit("origin/feat"), first.as_str());
}
