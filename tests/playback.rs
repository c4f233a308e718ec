use std::cell::{Cell, RefCell};
use std::rc::Rc;

use once_cell::sync::Lazy;
use serde_json::{json, Value};

use glam::{Quat, Vec3};
use scene_player::scene::CameraState;
use scene_player::{
    Camera, EventKind, HeadlessRenderer, InputEvent, KeyboardEvent, ListenerOptions,
    ManualTimeSource, NativeEngine, Node, PlayOptions, Player, PlayerConfig, PlayerState,
    SceneDescription, SceneGraph, ScriptError,
};

static SCENE: Lazy<Value> = Lazy::new(|| {
    json!({
        "object": {
            "uuid": "root",
            "type": "Scene",
            "name": "World",
            "children": [
                { "uuid": "cube", "type": "Mesh", "name": "Cube" },
                { "uuid": "lamp", "type": "PointLight", "name": "Lamp", "position": [0, 5, 0] }
            ]
        },
        "animations": [
            {
                "name": "Spin",
                "duration": 2,
                "tracks": [
                    { "name": "cube.quaternion", "type": "quaternion", "times": [0, 2], "values": [0, 0, 0, 1, 0, 1, 0, 0] }
                ]
            },
            {
                "name": "Bob",
                "duration": 1,
                "tracks": [
                    { "name": "Lamp.position", "type": "vector", "times": [0, 1], "values": [0, 5, 0, 0, 6, 0] }
                ]
            }
        ]
    })
});

static CAMERA: Lazy<Value> = Lazy::new(|| {
    json!({ "object": { "uuid": "cam", "type": "PerspectiveCamera", "fov": 45 } })
});

fn description(scripts: Value) -> SceneDescription {
    SceneDescription::from_json(json!({
        "scene": SCENE.clone(),
        "camera": CAMERA.clone(),
        "scripts": scripts,
    }))
    .expect("valid description")
}

fn player() -> (Player, ManualTimeSource) {
    let clock = ManualTimeSource::new();
    let player = Player::new(PlayerConfig::default()).with_time_source(clock.clone());
    (player, clock)
}

type Recorded = Rc<RefCell<Vec<Vec<Value>>>>;

fn record(player: &Player, channel: &str) -> Recorded {
    let seen: Recorded = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    player.add_event_listener(
        channel,
        move |args| {
            sink.borrow_mut().push(args.to_vec());
            Ok(())
        },
        ListenerOptions::default(),
    );
    seen
}

#[test]
fn reloading_replaces_every_fixed_handler() {
    let (mut player, clock) = player();
    let ticks = record(&player, "tick");

    player
        .load(description(json!({
            "cube": [{ "source": "function update(self) runtime:invoke('tick', 'first') end" }]
        })))
        .unwrap();
    player
        .load(description(json!({
            "lamp": [{ "source": "function update(self) runtime:invoke('tick', 'second') end" }]
        })))
        .unwrap();
    assert_eq!(player.handler_count(EventKind::Update), 1);

    player.play();
    clock.advance_millis(16);
    player.frame();
    assert_eq!(*ticks.borrow(), vec![vec![json!("second")]]);
    assert_eq!(player.listener_count("tick"), 1);
}

#[test]
fn update_fires_each_frame_with_growing_time() {
    let (mut player, clock) = player();
    let frames = record(&player, "frame");
    player
        .load(description(json!({
            "cube": [{
                "name": "reporter",
                "source": "function update(self, event) runtime:invoke('frame', self.uuid, event.time, event.delta) end"
            }]
        })))
        .unwrap();

    player.play();
    for step in [16, 16, 17] {
        clock.advance_millis(step);
        assert!(player.frame());
    }

    let frames = frames.borrow();
    assert_eq!(frames.len(), 3);
    let times: Vec<f64> = frames.iter().map(|args| args[2].as_f64().unwrap()).collect();
    let deltas: Vec<f64> = frames.iter().map(|args| args[3].as_f64().unwrap()).collect();
    assert!(frames.iter().all(|args| args[0] == json!("cube")));
    assert_eq!(times, [16.0, 32.0, 49.0]);
    assert_eq!(deltas, [16.0, 16.0, 17.0]);
}

#[test]
fn root_methods_run_with_the_scene_root_as_receiver() {
    let (mut player, _) = player();
    let greetings = record(&player, "greeted");
    let report = player
        .load(description(json!({
            "__root__": [{ "source": "function greet(self, who) runtime:invoke('greeted', self.uuid, self.name, who) end" }]
        })))
        .unwrap();
    assert_eq!(report.handlers, 1);
    assert_eq!(player.handler_count(EventKind::Update), 0);

    assert!(player.call_method("greet", &[json!("hi")]));
    assert!(!player.call_method("wave", &[]));
    assert_eq!(
        *greetings.borrow(),
        vec![vec![json!("root"), json!("World"), json!("hi")]]
    );
}

#[test]
fn root_methods_can_collect_their_arguments() {
    let (mut player, _) = player();
    let packed = record(&player, "packed");
    player
        .load(description(json!({
            "__root__": [{
                "source": "function greet(self, ...) local args = {...} runtime:invoke('packed', #args, args[1], args[2]) end"
            }]
        })))
        .unwrap();

    assert!(player.call_method("greet", &[json!("hi"), json!(3)]));
    let packed = packed.borrow();
    assert_eq!(packed[0][0].as_i64(), Some(2));
    assert_eq!(packed[0][1], json!("hi"));
    assert_eq!(packed[0][2].as_i64(), Some(3));
}

#[test]
fn lifecycle_events_reach_node_scripts() {
    let (mut player, clock) = player();
    let life = record(&player, "life");
    player
        .load(description(json!({
            "cube": [{
                "source": r#"
                    function init(self) runtime:invoke('life', 'init') end
                    function start(self) runtime:invoke('life', 'start') end
                    function stop(self) runtime:invoke('life', 'stop') end
                "#
            }]
        })))
        .unwrap();
    player.play();
    clock.advance_millis(16);
    player.frame();
    player.stop();
    assert!(!player.frame());

    let names: Vec<Value> = life.borrow().iter().map(|args| args[0].clone()).collect();
    assert_eq!(names, [json!("init"), json!("start"), json!("stop")]);
}

#[test]
fn one_failing_handler_does_not_stop_the_others() {
    let (mut player, clock) = player();
    let after = record(&player, "after");
    player
        .load(description(json!({
            "cube": [{ "source": "function update(self) error('cube is broken') end" }],
            "lamp": [{ "source": "function update(self) runtime:invoke('after') end" }]
        })))
        .unwrap();
    player.play();
    clock.advance_millis(16);
    assert!(player.frame());
    assert_eq!(after.borrow().len(), 1);
}

#[test]
fn broken_and_orphaned_scripts_are_skipped() {
    let (mut player, _) = player();
    let report = player
        .load(description(json!({
            "ghost": [{ "source": "function update(self) end" }],
            "cube": [
                { "source": "function update(" },
                { "source": "return { update = function(self) end, jump = function(self) end }" }
            ]
        })))
        .unwrap();
    assert_eq!(report.scripts_skipped, 1);
    assert_eq!(report.scripts_failed, 1);
    assert_eq!(report.scripts_compiled, 1);
    assert_eq!(report.handlers, 1);
    assert_eq!(report.rejected_handlers, 1);
    assert_eq!(report.nodes, 3);
    assert_eq!(report.animations, 2);
    assert_eq!(player.state(), PlayerState::Ready);
}

#[test]
fn input_events_dispatch_to_matching_handlers() {
    let (mut player, _) = player();
    let keys = record(&player, "key");
    player
        .load(description(json!({
            "cube": [{ "source": "function keydown(self, event) runtime:invoke('key', event.key, runtime:isKeyDown(event.key)) end" }]
        })))
        .unwrap();
    let event = InputEvent::KeyDown(KeyboardEvent::new("Space"));
    assert!(!player.handle_input(&event));
    player.play();
    assert!(player.handle_input(&event));
    assert_eq!(*keys.borrow(), vec![vec![json!("Space"), json!(true)]]);
}

#[test]
fn playing_an_animation_stops_the_others_unless_asked_not_to() {
    let (mut player, _) = player();
    player.load(description(json!({}))).unwrap();
    assert_eq!(player.animations(), ["Spin", "Bob"]);

    assert!(player.play_animation("Spin", PlayOptions::default()));
    assert!(player.play_animation("Bob", PlayOptions::default()));
    assert!(!player.is_animation_playing("Spin"));
    assert!(player.is_animation_playing("Bob"));

    assert!(player.play_animation("Spin", PlayOptions::blended()));
    assert!(player.is_animation_playing("Spin"));
    assert!(player.is_animation_playing("Bob"));

    assert!(!player.play_animation("Fly", PlayOptions::default()));
    assert!(!player.is_animation_playing("Fly"));
}

#[test]
fn pause_and_resume_keep_the_playhead() {
    let (mut player, clock) = player();
    player.load(description(json!({}))).unwrap();
    player.play();
    player.play_animation("Spin", PlayOptions::default());

    clock.advance_millis(500);
    player.frame();
    let time = player.animation_time("Spin").unwrap();
    assert!((time - 0.5).abs() < 1e-4);

    assert!(player.pause_animation("Spin"));
    assert!(!player.is_animation_playing("Spin"));
    clock.advance_millis(500);
    player.frame();
    assert_eq!(player.animation_time("Spin"), Some(time));

    assert!(player.resume_animation("Spin"));
    assert!(player.is_animation_playing("Spin"));
    assert_eq!(player.animation_time("Spin"), Some(time));
}

#[test]
fn seeking_round_trips_exactly() {
    let (mut player, _) = player();
    player.load(description(json!({}))).unwrap();
    assert!(player.set_animation_time("Bob", 0.37));
    assert_eq!(player.animation_time("Bob"), Some(0.37));
    assert!(!player.set_animation_time("Fly", 1.0));
    assert!(!player.set_animation_time("Bob", f32::NAN));
    assert_eq!(player.animation_time("Bob"), Some(0.37));
}

#[test]
fn bad_script_seeks_cannot_break_the_frame_loop() {
    let (mut player, clock) = player();
    player
        .load(description(json!({
            "lamp": [{
                "source": r#"
                    function start(self)
                        runtime:playAnimation("Bob", { loop = "pingpong" })
                        pcall(function() runtime:setAnimationTime("Bob", 0/0) end)
                    end
                "#
            }]
        })))
        .unwrap();
    player.play();
    assert!(player.set_animation_time("Bob", 1.0e9));
    for step in [16, 16, 17] {
        clock.advance_millis(step);
        assert!(player.frame());
    }
    let time = player.animation_time("Bob").unwrap();
    assert!((0.0..=1.0).contains(&time));
    assert!(player.is_animation_playing("Bob"));
}

#[test]
fn loading_animations_needs_a_scene() {
    let (mut player, _) = player();
    assert_eq!(player.load_animations(&[SCENE["animations"][0].clone()]), 0);
    assert!(player.animations().is_empty());
}

#[test]
fn loading_animations_replaces_clips_and_restores_the_pose() {
    let (mut player, clock) = player();
    player.load(description(json!({}))).unwrap();
    player.play();
    player.play_animation("Spin", PlayOptions::default());
    clock.advance_millis(500);
    player.frame();
    let cube = player.scene().unwrap().get("cube").unwrap();
    assert_ne!(cube.quaternion, Quat::IDENTITY);

    let wave = json!({
        "name": "Wave",
        "duration": 1,
        "tracks": [
            { "name": "cube.scale", "type": "vector", "times": [0, 1], "values": [1, 1, 1, 2, 2, 2] }
        ]
    });
    assert_eq!(player.load_animations(&[wave]), 1);
    assert_eq!(player.animations(), ["Wave"]);
    assert!(!player.is_animation_playing("Spin"));
    assert_eq!(player.animation_time("Spin"), None);
    assert!(!player.is_animation_playing("Wave"));

    clock.advance_millis(500);
    player.frame();
    let cube = player.scene().unwrap().get("cube").unwrap();
    assert_eq!(cube.quaternion, Quat::IDENTITY);
    assert_eq!(cube.scale, Vec3::ONE);
    assert_eq!(player.animation_time("Wave"), Some(0.0));
}

#[test]
fn animations_move_bound_nodes_and_restore_them_when_stopped() {
    let (mut player, clock) = player();
    player.load(description(json!({}))).unwrap();
    player.play();
    player.play_animation("Bob", PlayOptions::default());

    clock.advance_millis(500);
    player.frame();
    let lamp = player.scene().unwrap().get("lamp").unwrap();
    assert!((lamp.position.y - 5.5).abs() < 1e-4);

    player.stop_animation("Bob");
    clock.advance_millis(16);
    player.frame();
    let lamp = player.scene().unwrap().get("lamp").unwrap();
    assert_eq!(lamp.position.y, 5.0);
}

#[test]
fn scripts_can_drive_animations_and_channels() {
    let (mut player, _) = player();
    let pongs = record(&player, "pong");
    player
        .load(description(json!({
            "cube": [{
                "source": r#"
                    function init(self)
                        runtime:playAnimation("Bob", { loop = "once", timeScale = 2 })
                        runtime:addEventListener("ping", function(n)
                            runtime:invoke("pong", n + 1)
                        end, { once = true })
                    end
                "#
            }]
        })))
        .unwrap();

    assert!(player.is_animation_playing("Bob"));
    assert_eq!(player.invoke("ping", &[json!(1)]), 1);
    assert_eq!(player.invoke("ping", &[json!(1)]), 0);
    assert_eq!(pongs.borrow().len(), 1);
    assert_eq!(pongs.borrow()[0][0].as_i64(), Some(2));
}

#[test]
fn once_listeners_fire_a_single_time() {
    let (player, _) = player();
    let count = Rc::new(Cell::new(0));
    let seen = Rc::clone(&count);
    player.add_event_listener(
        "x",
        move |_| {
            seen.set(seen.get() + 1);
            Ok(())
        },
        ListenerOptions::once(),
    );
    player.invoke("x", &[]);
    player.invoke("x", &[]);
    assert_eq!(count.get(), 1);
}

#[test]
fn failing_listener_does_not_block_the_next() {
    let (player, _) = player();
    player.add_event_listener(
        "x",
        |_| Err(ScriptError::callback("listener failed")),
        ListenerOptions::default(),
    );
    let seen = record(&player, "x");
    assert_eq!(player.invoke("x", &[json!(7)]), 2);
    assert_eq!(*seen.borrow(), vec![vec![json!(7)]]);
}

#[test]
fn listeners_can_be_removed_and_cleared() {
    let (player, _) = player();
    let id = player.add_event_listener("x", |_| Ok(()), ListenerOptions::default());
    record(&player, "y");
    assert!(player.remove_event_listener("x", id));
    assert_eq!(player.invoke("x", &[]), 0);
    player.clear_event_listeners();
    assert_eq!(player.listener_count("y"), 0);
}

#[test]
fn channels_survive_dispose_but_handlers_do_not() {
    let renderer = HeadlessRenderer::new();
    let stats = renderer.stats_handle();
    let (player, clock) = player();
    let mut player = player.with_renderer(renderer);
    let frames = record(&player, "frame");
    player
        .load(description(json!({
            "cube": [{ "source": "function update(self, event) runtime:invoke('frame', event.time) end" }]
        })))
        .unwrap();

    player.render(1.5);
    assert_eq!(*frames.borrow(), vec![vec![json!(1500.0)]]);
    assert_eq!(stats.read().frames, 1);

    player.play();
    player.dispose();
    clock.advance_millis(16);
    assert!(!player.frame());
    assert!(stats.read().disposed);
    assert_eq!(player.handler_count(EventKind::Update), 0);
    assert_eq!(player.listener_count("frame"), 1);
    assert!(player.animations().is_empty());
}

#[test]
fn project_settings_and_size_reach_the_renderer() {
    let renderer = HeadlessRenderer::new();
    let stats = renderer.stats_handle();
    let mut player = Player::new(PlayerConfig {
        width: 640,
        height: 480,
        pixel_ratio: 2.0,
        ..PlayerConfig::default()
    })
    .with_renderer(renderer);

    let mut description = description(json!({}));
    description.project.tone_mapping = Some(4);
    player.load(description).unwrap();
    player.set_size(800, 400);

    let stats = stats.read();
    assert_eq!(stats.size, (800, 400));
    assert_eq!(stats.pixel_ratio, 2.0);
    assert_eq!(stats.settings.tone_mapping, Some(4));
    assert_eq!(stats.settings.shadows, None);
    assert_eq!(player.camera().unwrap().aspect(), 2.0);
}

#[test]
fn replacement_camera_takes_the_viewport_aspect() {
    let mut player = Player::new(PlayerConfig {
        width: 800,
        height: 400,
        ..PlayerConfig::default()
    });
    player.load(description(json!({}))).unwrap();
    player.set_camera(Camera::new(CameraState::perspective("overview", 60.0, 0.1, 100.0)));

    let camera = player.camera().unwrap();
    assert_eq!(camera.uuid().as_str(), "overview");
    assert_eq!(camera.aspect(), 2.0);
}

#[test]
fn replacement_scene_is_drawn_while_handlers_keep_their_graph() {
    let renderer = HeadlessRenderer::new();
    let stats = renderer.stats_handle();
    let (player, _) = player();
    let mut player = player.with_renderer(renderer);
    player
        .load(description(json!({
            "cube": [{ "source": "function update(self) self:translate(Vector3.new(1, 0, 0)) end" }]
        })))
        .unwrap();
    let loaded = player.scene().unwrap().clone();

    player.set_scene(SceneGraph::new(Node::new("solo", "Scene")));
    player.render(0.0);

    assert_eq!(player.scene().unwrap().root_id().as_str(), "solo");
    assert_eq!(stats.read().visible_nodes, 1);
    assert_eq!(loaded.get("cube").unwrap().position.x, 1.0);
}

#[test]
fn native_behaviors_plug_in_as_an_engine() {
    let clock = ManualTimeSource::new();
    let engine = NativeEngine::new().with_behavior("slide", |ctx, handlers| {
        let scene = ctx.scene.clone();
        handlers.on("update", move |target, _| {
            scene.update(target.node_id().as_str(), |node| node.position.x += 1.0);
            Ok(())
        });
        Ok(())
    });
    let mut player = Player::default()
        .with_engine(engine)
        .with_time_source(clock.clone());
    player
        .load(description(json!({ "cube": [{ "source": "slide" }] })))
        .unwrap();
    player.play();
    for _ in 0..2 {
        clock.advance_millis(16);
        player.frame();
    }
    assert_eq!(player.scene().unwrap().get("cube").unwrap().position.x, 2.0);
}

#[test]
fn malformed_descriptions_are_rejected() {
    let (mut player, _) = player();
    assert!(player.load_json("{ not json").is_err());
    assert!(player
        .load(SceneDescription::new(json!({ "object": {} }), CAMERA.clone()))
        .is_err());
    assert_eq!(player.state(), PlayerState::Idle);
}
