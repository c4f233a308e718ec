use assert_cmd::prelude::*;
use predicates::str::contains;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn write_scene() -> NamedTempFile {
    let scene = r#"{
  "project": { "shadows": true },
  "camera": { "object": { "uuid": "cam", "type": "PerspectiveCamera", "fov": 60 } },
  "scene": {
    "object": {
      "uuid": "root",
      "type": "Scene",
      "name": "World",
      "children": [
        { "uuid": "cube", "type": "Mesh", "name": "Cube" }
      ]
    },
    "animations": [
      {
        "name": "Rise",
        "duration": 1,
        "tracks": [
          { "name": "cube.position", "type": "vector", "times": [0, 1], "values": [0, 0, 0, 0, 10, 0] }
        ]
      }
    ]
  },
  "scripts": {
    "cube": [
      { "name": "drift", "source": "function update(self, event) self:translate(Vector3.new(1, 0, 0)) end" }
    ],
    "__root__": [
      { "source": "function hide(self) self:getObjectByName('Cube').visible = false end" }
    ]
  }
}"#;
    let mut tmp = NamedTempFile::new().expect("temp scene");
    tmp.write_all(scene.as_bytes()).expect("write scene");
    tmp
}

#[test]
fn cli_plays_frames_and_prints_final_state() {
    let scene = write_scene();
    let mut cmd = Command::cargo_bin("scene-player").expect("binary exists");
    cmd.arg(scene.path()).args(["--frames", "3", "--call", "hide"]);
    cmd.assert()
        .success()
        .stdout(contains(
            "Loaded scene with 2 nodes, 2 script(s) (0 failed), 2 handler(s), 1 animation(s)",
        ))
        .stdout(contains("Called hide: ok"))
        .stdout(contains("Rendered 3 frame(s)"))
        .stdout(contains(" - Cube (Mesh) pos=(3.00, 0.00, 0.00) visible=false"));
}

#[test]
fn cli_reports_missing_animation() {
    let scene = write_scene();
    let mut cmd = Command::cargo_bin("scene-player").expect("binary exists");
    cmd.arg(scene.path()).args(["--play", "Fall"]);
    cmd.assert()
        .failure()
        .stderr(contains("scene has no animation named Fall"));
}

#[test]
fn cli_requires_a_scene_path() {
    let mut cmd = Command::cargo_bin("scene-player").expect("binary exists");
    cmd.assert().failure().stderr(contains("Usage: scene-player"));
}

#[test]
fn cli_steps_frames_at_the_configured_rate() {
    let scene = write_scene();
    let mut config = NamedTempFile::new().expect("temp config");
    config.write_all(br#"{ "fps": 10 }"#).expect("write config");

    let mut cmd = Command::cargo_bin("scene-player").expect("binary exists");
    cmd.arg(scene.path())
        .args(["--frames", "2", "--play", "Rise", "--config"])
        .arg(config.path());
    cmd.assert()
        .success()
        .stdout(contains("Playing animation Rise"))
        .stdout(contains(" - Cube (Mesh) pos=(2.00, 2.00, 0.00) visible=true"));
}

#[test]
fn cli_falls_back_to_default_config() {
    let scene = write_scene();
    let mut cmd = Command::cargo_bin("scene-player").expect("binary exists");
    cmd.arg(scene.path())
        .args(["--config", "/nonexistent/player.json"]);
    cmd.assert()
        .success()
        .stdout(contains("Rendered 1 frame(s)"));
}
