use glam::Vec2;
use linelight::config::DrawMode;
use linelight::display::{Display, InputEvent, MouseButtonKind, PixelBuffer, RenderTarget};
use linelight::util::FpsCounter;
use linelight::{Config, Renderer, Scene};
use sdl2::keyboard::Keycode;

const LINE_COLOR: (u8, u8, u8) = (255, 255, 255);
const BOUNDS_COLOR: (u8, u8, u8) = (0, 255, 0);
const POLYGON_COLOR: (u8, u8, u8) = (255, 160, 0);

struct Args {
    config: Option<String>,
    scene: Option<String>,
    vsync: bool,
}

/// Parse command line arguments
fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config: None,
        scene: None,
        vsync: true,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--no-vsync" => parsed.vsync = false,
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(args[i + 1].clone());
                    i += 1;
                }
            },
            "--scene" | "-s" => {
                if i + 1 < args.len() {
                    parsed.scene = Some(args[i + 1].clone());
                    i += 1;
                }
            },
            "--help" => {
                println!("Usage: linelight [OPTIONS]");
                println!();
                println!("Options:");
                println!("  --config FILE, -c FILE  Pipeline config (JSON)");
                println!("  --scene FILE, -s FILE   Scene to light (JSON, default: built-in demo)");
                println!("  --no-vsync              Disable VSync for uncapped framerate");
                println!("  --help                  Show this help message");
                std::process::exit(0);
            },
            _ => {},
        }
        i += 1;
    }

    parsed
}

fn main() -> Result<(), String> {
    env_logger::init();
    let args = parse_args();

    let mut config = match &args.config {
        Some(path) => Config::load(path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };
    let scene = match &args.scene {
        Some(path) => Scene::load(path).map_err(|e| e.to_string())?,
        None => Scene::demo(),
    };
    config.domain = scene.domain;
    let (width, height) = (config.framebuffer.width, config.framebuffer.height);

    let mut renderer = Renderer::new(config);
    renderer.set_lines(&scene.line_data()).map_err(|e| e.to_string())?;
    renderer.set_lights(&scene.lights).map_err(|e| e.to_string())?;

    let (mut display, texture_creator) = Display::with_options("linelight", width, height, args.vsync)?;
    let mut target = RenderTarget::with_size(&texture_creator, width, height)?;
    let mut buffer = PixelBuffer::with_size(width, height);
    let mut fps_counter = FpsCounter::new(60);

    println!("=== linelight ===");
    println!("Scene: {} ({} lines, {} lights)", scene.name, renderer.lines().len(), renderer.lights().len());
    println!("Resolution: {}x{}", width, height);
    println!("Controls:");
    println!("  Drag       - Move light 0");
    println!("  L          - Recompute all polar maps");
    println!("  P          - Toggle fullscreen / bounded light draw");
    println!("  B          - Toggle light bounds and visibility polygon overlay");
    println!("  Escape     - Quit");

    let mut dragging = false;
    let mut last_mouse = (0, 0);
    let mut needs_frame = true;

    'main: loop {
        fps_counter.tick();

        for event in display.poll_events() {
            match event {
                InputEvent::Quit => break 'main,
                InputEvent::KeyDown(key) => match key {
                    Keycode::Escape => break 'main,
                    Keycode::L => renderer.request_polar_rebuild(),
                    Keycode::P => {
                        let mode = renderer.toggle_draw_mode();
                        println!(
                            "Light draw: {}",
                            if mode == DrawMode::Bounded { "bounded" } else { "fullscreen" }
                        );
                    },
                    Keycode::B => {
                        renderer.toggle_bounds_overlay();
                    },
                    _ => continue,
                },
                InputEvent::MouseDown { x, y, button: MouseButtonKind::Left } => {
                    dragging = true;
                    last_mouse = (x, y);
                    continue;
                },
                InputEvent::MouseUp { button: MouseButtonKind::Left, .. } => {
                    dragging = false;
                    continue;
                },
                InputEvent::MouseMove { x, y } if dragging => {
                    let size = renderer.config().domain.size();
                    let delta = Vec2::new(
                        (x - last_mouse.0) as f32 / width as f32 * size.x,
                        -((y - last_mouse.1) as f32) / height as f32 * size.y,
                    );
                    last_mouse = (x, y);
                    if let Err(e) = renderer.move_light(0, delta) {
                        log::warn!("drag: {}", e);
                        continue;
                    }
                },
                _ => continue,
            }
            needs_frame = true;
        }

        if needs_frame {
            let status = renderer.render_domain();
            needs_frame = status.redraw_requested;

            let domain = renderer.config().domain;
            buffer.tonemap_from(renderer.framebuffer());
            for line in renderer.lines().lines() {
                buffer.draw_segment(&domain, line.a, line.b, LINE_COLOR);
            }
            if renderer.shows_bounds() {
                for bounds in renderer.light_bounds() {
                    buffer.draw_box(&domain, &bounds, BOUNDS_COLOR);
                }
                if let Ok(polygon) = renderer.visibility_polygon(0) {
                    buffer.draw_outline(&domain, &polygon.points(), POLYGON_COLOR);
                }
            }

            let (p1, p50, p99) = fps_counter.percentiles_ms();
            log::debug!("frame {}: {:.1} / {:.1} / {:.1} ms", renderer.frame_count(), p1, p50, p99);
        }

        display.present(&mut target, &buffer)?;
    }

    Ok(())
}
