//! Decoding loop template.
//!
//! Initializes a decoder, pushes packets through it, flushes and closes it.
//! Runs on the in-process fake backend, so it works without a GPU; swap in a
//! real backend to decode actual streams.
//!
//! Run with: cargo run --example decode_loop -- <hardware|none> <codec> [device] [input]
//!
//! Examples:
//!   decode_loop vaapi h264
//!   decode_loop vaapi h264 /dev/dri/renderD128
//!   decode_loop none hevc "" stream.hevc

use anyhow::{bail, Result};
use hvd::{Decoder, DecoderConfig, FakeBackend, Packet, SoftwareFrame, Status};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const CHUNK_SIZE: usize = 4096;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <hardware|none> <codec> [device] [input]\n", args[0]);
        eprintln!("examples:");
        for hint in [
            "vaapi h264",
            "vdpau h264",
            "vaapi h264 /dev/dri/renderD128",
            "dxva2 h264",
            "d3d11va h264",
            "videotoolbox h264",
            "cuda hevc",
        ] {
            eprintln!("{} {}", args[0], hint);
        }
        std::process::exit(1);
    }

    let hardware = args[1].as_str();
    let device = args.get(3).map(String::as_str);
    let config = DecoderConfig::from_names(Some(hardware), &args[2], device, None, WIDTH, HEIGHT)?;

    let mut backend = FakeBackend::new();
    let mut decoder = match Decoder::init(config, &mut backend) {
        Ok(decoder) => decoder,
        Err(e) => {
            eprintln!("failed to initialize hardware decoder for {hardware}: {e}");
            eprintln!("hints:");
            eprintln!("- try using other device? (not {})", device.unwrap_or("default"));
            eprintln!("- try using other hardware? (not {hardware})");
            std::process::exit(1);
        }
    };
    println!("initialized decoder...");

    let stream = match args.get(4) {
        Some(path) => std::fs::read(path)?,
        None => {
            println!("no input file, decoding a synthetic stream");
            (0..30u8).flat_map(|i| [i.wrapping_mul(8); CHUNK_SIZE]).collect()
        }
    };

    let mut frames = 0usize;
    for chunk in stream.chunks(CHUNK_SIZE) {
        // Again: input is full, take frames out and send the same chunk again
        while decoder.send_packet(Packet::new(chunk))?.is_again() {
            frames += receive_all(&mut decoder)?;
        }
        frames += receive_all(&mut decoder)?;
    }

    println!("flushing decoder...");
    if decoder.send_packet(Packet::flush())?.is_again() {
        bail!("decoder refused flush");
    }
    frames += receive_all(&mut decoder)?;

    println!("decoded {frames} frames");
    decoder.close();
    println!("closed decoder...");
    Ok(())
}

fn receive_all(decoder: &mut Decoder<FakeBackend>) -> Result<usize> {
    let mut count = 0;
    while let Status::Ready(frame) = decoder.receive_frame()? {
        consume(frame);
        count += 1;
    }
    Ok(count)
}

fn consume(frame: &SoftwareFrame) {
    println!(
        "Frame: {}x{} {}, linesize {}, {} bytes, pts {:?}",
        frame.width(),
        frame.height(),
        frame.format(),
        frame.linesize(0),
        frame.data().len(),
        frame.pts()
    );
}
