use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
};

use serde::Deserialize;

const PROJECT_NAME: &str = "desk-rs";
const BOARDS_FILE: &str = "boards.toml";
const BINARIES_OUTPUT_DIR: &str = "release_binaries";

type DynError = Box<dyn std::error::Error>;

#[derive(Deserialize)]
struct BoardTable {
    board: Vec<Board>,
}

#[derive(Deserialize)]
struct Board {
    name: String,
    mcu: Mcu,
    flash_mb: u8,
}

struct Toolchain {
    channel: String,
    components: Option<Vec<String>>,
    targets: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mcu {
    Esp32S3,
    Esp32C6,
}

impl Mcu {
    fn target_triple(&self) -> &str {
        match self {
            Mcu::Esp32S3 => "xtensa-esp32s3-none-elf",
            Mcu::Esp32C6 => "riscv32imac-unknown-none-elf",
        }
    }

    fn chip(&self) -> &str {
        match self {
            Mcu::Esp32S3 => "esp32s3",
            Mcu::Esp32C6 => "esp32c6",
        }
    }

    fn toolchain(&self) -> Toolchain {
        match self {
            Mcu::Esp32S3 => Toolchain {
                channel: "esp".to_string(),
                components: None,
                targets: None,
            },
            Mcu::Esp32C6 => Toolchain {
                channel: "stable".to_string(),
                components: Some(vec!["rust-src".to_string()]),
                targets: Some(vec!["riscv32imac-unknown-none-elf".to_string()]),
            },
        }
    }
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("{}", e);
        std::process::exit(-1);
    }
}

fn try_main() -> Result<(), DynError> {
    let task = env::args().nth(1);
    match task.as_deref() {
        Some("run") => {
            let board_arg = env::args().nth(2);
            if let Some(name) = board_arg {
                let board = find_board(&name)?;
                run_cargo_cmd("run", &board)?
            } else {
                Err("Board not given")?
            }
        }
        Some("build-all") => build_all()?,
        Some("boards") => {
            for board in load_boards()? {
                println!("{} ({})", board.name, board.mcu.chip());
            }
        }
        Some("clean") => clean()?,
        _ => print_help(),
    }
    Ok(())
}

fn print_help() {
    eprintln!(
        "
Available Tasks:
run <board>: builds and runs the firmware
build-all: builds all the firmware binaries
boards: lists the known boards
clean: remove all the built files
"
    )
}

fn load_boards() -> Result<Vec<Board>, DynError> {
    let path = project_root()?.join(BOARDS_FILE);
    let table: BoardTable = toml::from_str(&fs::read_to_string(&path)?)?;
    Ok(table.board)
}

fn find_board(name: &str) -> Result<Board, DynError> {
    load_boards()?
        .into_iter()
        .find(|board| board.name == name)
        .ok_or_else(|| format!("Invalid board: {}", name).into())
}

fn ensure_toolchain(toolchain: &Toolchain) -> Result<(), DynError> {
    let (Some(components), Some(targets)) = (&toolchain.components, &toolchain.targets) else {
        return Ok(());
    };

    let status = Command::new("rustup")
        .args(["component", "add", "--toolchain", &toolchain.channel])
        .args(components)
        .status()?;
    if !status.success() {
        Err("Failed to add toolchain components")?;
    }

    let status = Command::new("rustup")
        .args(["target", "add", "--toolchain", &toolchain.channel])
        .args(targets)
        .status()?;
    if !status.success() {
        Err("Failed to add toolchain targets")?;
    }

    Ok(())
}

fn run_cargo_cmd(cmd: &str, board: &Board) -> Result<(), DynError> {
    let feature = format!("board_{}", board.name);
    let root = project_root()?;

    println!("Starting the build for {}", board.name);
    println!("Building in {}", root.display());

    let toolchain = board.mcu.toolchain();
    ensure_toolchain(&toolchain)?;

    let mut command = Command::new("cargo");
    let command = command
        .current_dir(&root)
        .arg(format!("+{}", toolchain.channel))
        .arg(cmd)
        .arg("--release")
        .args(["--target", board.mcu.target_triple()])
        .args(["--features", &feature]);

    let status = command.status()?;

    if !status.success() {
        Err(format!("Failed to build {}", PROJECT_NAME))?;
    }

    Ok(())
}

fn build_all() -> Result<(), DynError> {
    let root = project_root()?;
    let output_dir = root.join(BINARIES_OUTPUT_DIR);
    let elf_dir = output_dir.join("elf");
    let bin_dir = output_dir.join("bin");

    fs::create_dir_all(&elf_dir)?;
    fs::create_dir_all(&bin_dir)?;

    for board in load_boards()? {
        let build_out_file = root
            .join("target")
            .join(board.mcu.target_triple())
            .join("release")
            .join(PROJECT_NAME);

        println!("Build out: {}", build_out_file.display());

        run_cargo_cmd("build", &board)?;

        let elf_path = elf_dir.join(&board.name).with_extension("elf");
        let bin_path = bin_dir.join(&board.name).with_extension("bin");

        fs::copy(&build_out_file, &elf_path)?;

        let mut command = Command::new("espflash");
        let command = command
            .current_dir(&root)
            .arg("save-image")
            .arg("--merge")
            .args(["--chip", board.mcu.chip()])
            .args(["--flash-size", &format!("{}mb", board.flash_mb)])
            .arg(&elf_path)
            .arg(&bin_path);

        let status = command.status()?;

        if !status.success() {
            Err("Failed to convert elf to bin")?;
        }
    }
    Ok(())
}

fn clean() -> Result<(), DynError> {
    let root = project_root()?;
    let output_dir = root.join(BINARIES_OUTPUT_DIR);

    if let Err(err) = fs::remove_dir_all(output_dir) {
        if err.kind() != std::io::ErrorKind::NotFound {
            Err(err)?
        }
    }

    let status = Command::new("cargo")
        .current_dir(&root)
        .arg("clean")
        .status()?;

    if !status.success() {
        Err("Failed to clean")?;
    }

    Ok(())
}

fn project_root() -> Result<PathBuf, DynError> {
    let workspace = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .ok_or("xtask is not inside the workspace")?;
    Ok(workspace.join(PROJECT_NAME))
}
