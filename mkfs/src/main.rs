use std::{env, path::Path, process};

use mkfs::FileDevice;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!("Usage: {} <image> <size-in-blocks> <ninodes>", args[0]);
        process::exit(1);
    }

    let image = Path::new(&args[1]);
    let size: u32 = args[2].parse().unwrap_or_else(|_| {
        eprintln!("mkfs: bad block count {:?}", args[2]);
        process::exit(1);
    });
    let ninodes: u32 = args[3].parse().unwrap_or_else(|_| {
        eprintln!("mkfs: bad inode count {:?}", args[3]);
        process::exit(1);
    });

    let device = FileDevice::create(image, size).unwrap_or_else(|e| {
        eprintln!("mkfs: cannot create {}: {e}", image.display());
        process::exit(1);
    });

    let sb = mkfs::build(&device, size, ninodes).unwrap_or_else(|e| {
        eprintln!("mkfs: write failed: {e}");
        process::exit(1);
    });

    println!(
        "{}: {} blocks, {} inodes, data starts at block {}",
        image.display(),
        sb.size,
        sb.ninodes,
        sb.data_start()
    );
}
