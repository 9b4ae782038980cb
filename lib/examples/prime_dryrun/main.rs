use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use primebuf::{
    display::{
        DisplayTarget, DrmDevice, PropertyBag, PLANE_PROPERTIES, ROCKCHIP_CONNECTOR_PROPERTIES,
        ROCKCHIP_PLANE_PROPERTIES,
    },
    ioctl::SyncFlags,
    memory::Udmabuf,
    pool::{BufferPool, BufferRef, PoolConfig},
    renderer::{DisplayCaps, PrimeRenderer, RendererConfig, NUM_BUFFERS},
    PictureInfo, PixelFormat, Rect,
};
use primebuf_utils::framegen::FrameGenerator;

use anyhow::{anyhow, ensure};
use clap::{App, Arg};

fn parse_id(matches: &clap::ArgMatches, name: &str) -> u32 {
    match clap::value_t!(matches.value_of(name), u32) {
        Ok(v) => v,
        Err(e) => panic!("Invalid value for {}: {}", name, e),
    }
}

fn fill_frame(
    buffer: &BufferRef<Udmabuf>,
    generator: &mut FrameGenerator,
    frame_size: (u32, u32),
) -> anyhow::Result<()> {
    buffer.allocate(frame_size.0, frame_size.1)?;
    ensure!(buffer.is_valid(), "buffer {} holds no memory", buffer.id());

    buffer.sync_start(SyncFlags::WRITE)?;
    buffer
        .with_planes_mut(|planes| generator.next_frame(planes))
        .ok_or_else(|| anyhow!("buffer {} holds no memory", buffer.id()))??;
    buffer.sync_end(SyncFlags::WRITE)?;

    buffer.set_picture(PictureInfo {
        width: frame_size.0,
        height: frame_size.1,
        ..Default::default()
    });

    Ok(())
}

fn main() {
    env_logger::init();

    let matches = App::new("DRM-PRIME plane dry run")
        .arg(
            Arg::with_name("device")
                .default_value("/dev/dri/card0")
                .help("Path to the DRM device file"),
        )
        .arg(
            Arg::with_name("udmabuf")
                .long("udmabuf")
                .takes_value(true)
                .default_value(Udmabuf::DEFAULT_PATH)
                .help("Path to the udmabuf device file"),
        )
        .arg(
            Arg::with_name("num_frames")
                .long("stop_after")
                .takes_value(true)
                .help("Stop after presenting a given number of frames"),
        )
        .arg(
            Arg::with_name("frame_size")
                .long("frame_size")
                .takes_value(true)
                .default_value("640x480")
                .help("Size of the frames to present (e.g. \"640x480\")"),
        )
        .arg(
            Arg::with_name("plane")
                .long("plane")
                .takes_value(true)
                .default_value("0")
                .help("Id of the plane to present on"),
        )
        .arg(
            Arg::with_name("crtc")
                .long("crtc")
                .takes_value(true)
                .default_value("0")
                .help("Id of the CRTC the plane is attached to"),
        )
        .arg(
            Arg::with_name("connector")
                .long("connector")
                .takes_value(true)
                .default_value("0")
                .help("Id of the connector driven by the CRTC"),
        )
        .get_matches();

    let device_path = matches.value_of("device").unwrap_or("/dev/dri/card0");
    let udmabuf_path = matches
        .value_of("udmabuf")
        .unwrap_or(Udmabuf::DEFAULT_PATH);

    let stop_after = match clap::value_t!(matches.value_of("num_frames"), usize) {
        Ok(v) => Some(v),
        Err(e) if e.kind == clap::ErrorKind::ArgumentNotFound => None,
        Err(e) => panic!("Invalid value for stop_after: {}", e),
    };

    let frame_size = matches
        .value_of("frame_size")
        .map(|s| {
            const ERROR_MSG: &str = "Invalid parameter for frame_size";
            let split: Vec<&str> = s.split('x').collect();
            if split.len() != 2 {
                panic!("{}", ERROR_MSG);
            }
            let width: u32 = split[0].parse().expect(ERROR_MSG);
            let height: u32 = split[1].parse().expect(ERROR_MSG);

            (width, height)
        })
        .unwrap();

    let target = DisplayTarget::new(
        parse_id(&matches, "plane"),
        parse_id(&matches, "crtc"),
        parse_id(&matches, "connector"),
    );

    let lets_quit = Arc::new(AtomicBool::new(false));
    // Setup the Ctrl+c handler.
    {
        let lets_quit_handler = lets_quit.clone();
        ctrlc::set_handler(move || {
            lets_quit_handler.store(true, Ordering::SeqCst);
        })
        .expect("Failed to set Ctrl-C handler.");
    }

    let device = Arc::new(DrmDevice::open(Path::new(device_path)).expect("Failed to open device"));
    println!(
        "Opened {} (driver {}, {})",
        device_path,
        device.version().name,
        device.version().desc
    );

    let pool = BufferPool::new(PoolConfig::new().udmabuf_path(udmabuf_path));
    let layout = primebuf::pool::frame_layout(frame_size.0, frame_size.1);
    let mut generator = FrameGenerator::new(
        frame_size.0 as usize,
        frame_size.1 as usize,
        layout.map(|p| p.pitch as usize),
    )
    .expect("Failed to create frame generator");

    let mut renderer = PrimeRenderer::new(
        Arc::clone(&device),
        target,
        &DisplayCaps {
            atomic: true,
            primary_plane: true,
        },
        &RendererConfig::new(),
    )
    .expect("Direct to plane rendering not supported");
    renderer.configure(
        &PictureInfo {
            width: frame_size.0,
            height: frame_size.1,
            ..Default::default()
        },
        PixelFormat::YUV420,
    );

    let mut request = PropertyBag::new()
        .with_properties(target.plane(), PLANE_PROPERTIES)
        .with_properties(target.plane(), ROCKCHIP_PLANE_PROPERTIES)
        .with_properties(target.connector(), ROCKCHIP_CONNECTOR_PROPERTIES);
    let dest = Rect::new(0, 0, frame_size.0, frame_size.1);

    let start_time = Instant::now();
    let mut frame_counter = 0usize;
    while !lets_quit.load(Ordering::SeqCst) {
        if let Some(max_frames) = stop_after {
            if frame_counter >= max_frames {
                break;
            }
        }

        let slot = frame_counter % NUM_BUFFERS;
        if renderer.need_buffer(slot) {
            println!("Slot {} still on screen, skipping frame", slot);
            frame_counter += 1;
            continue;
        }
        renderer.release_buffer(slot);

        let buffer = pool.get();
        if let Err(e) = fill_frame(&buffer, &mut generator, frame_size) {
            eprintln!("Failed to fill frame {}: {:#}", frame_counter, e);
            break;
        }
        renderer.add_video_picture(slot, &buffer);
        drop(buffer);

        renderer.render_update(&mut request, slot, dest);
        println!("Frame {} (slot {}):", frame_counter, slot);
        for (object, name, value) in request.iter() {
            println!("  {} {} = {}", object, name, value);
        }
        if let Some(active) = request.active() {
            println!("  ACTIVE = {}", active);
        }
        request.clear();

        frame_counter += 1;
    }

    renderer.disable(&mut request);
    println!("Disable:");
    for (object, name, value) in request.iter() {
        println!("  {} {} = {}", object, name, value);
    }

    let elapsed = start_time.elapsed();
    let fps = frame_counter as f64 / elapsed.as_millis() as f64 * 1000.0;
    println!(
        "{} frames in {:.2}s ({:.2} fps), pool {:?}",
        frame_counter,
        elapsed.as_secs_f64(),
        fps,
        pool.stats()
    );

    // The renderer must release its buffers before the pool goes away.
    drop(renderer);
    drop(pool);
}
