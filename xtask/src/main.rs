#![deny(unused_must_use)]

use std::{env, path::PathBuf};

use xshell::cmd;

#[rustfmt::skip]
fn main() -> Result<(), anyhow::Error> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let args = args.iter().map(|s| &**s).collect::<Vec<_>>();

    match &args[..] {
        ["test", "psxcard"] => test_psxcard(),
        [board, "build", "firmware"] => build_firmware(board),
        [board, "flash", "firmware"] => flash_firmware(board),
        _ => {
            println!("USAGE: cargo xtask test psxcard");
            println!("OR");
            println!("USAGE: cargo xtask [board] [build|flash] firmware");
            Ok(())
        }
    }
}

fn test_psxcard() -> Result<(), anyhow::Error> {
    let _p = xshell::pushd(root_dir())?;
    cmd!("cargo test --workspace").run()?;
    Ok(())
}

fn build_firmware(target: &&str) -> Result<(), anyhow::Error> {
    let _p = xshell::pushd(root_dir().join("boards/firmware").join(target))?;
    match *target {
        "rp2040" => {
            cmd!("cargo build --release").run()?;
        }
        _ => {
            println!("board not supported");
        }
    }
    Ok(())
}

fn flash_firmware(target: &&str) -> Result<(), anyhow::Error> {
    let _p = xshell::pushd(root_dir().join("boards/firmware").join(target))?;
    match *target {
        "rp2040" => {
            // expects the board in BOOTSEL mode
            cmd!("elf2uf2-rs -d ../../target/thumbv6m-none-eabi/release/rp2040").run()?;
        }
        _ => {
            println!("board not supported");
        }
    }
    Ok(())
}

fn root_dir() -> PathBuf {
    let mut xtask_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    xtask_dir.pop();
    xtask_dir
}
