//! Headless transport for the ostinato engine: a line-oriented prompt
//! mapping commands onto synchronous sequencer calls. The engine keeps
//! time on its own threads; this loop only edits and inspects.

use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use ostinato_core::{BankFile, Config, MidirOut, Sequencer};
use ostinato_types::note_name;

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ostinato")
        .join("ostinato.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = File::create(&log_path)
        .unwrap_or_else(|_| File::create("/tmp/ostinato.log").expect("Cannot create log file"));

    WriteLogger::init(log_level, simplelog::Config::default(), log_file)
        .expect("Failed to initialize logger");

    log::info!("ostinato starting (log level: {:?})", log_level);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    if args.iter().any(|a| a == "--list-devices") {
        match MidirOut::new() {
            Ok(midi) => {
                for (index, name) in midi.devices().iter().enumerate() {
                    println!("{}: {}", index, name);
                }
            }
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Optional positional argument: the patterns file.
    let bank_path = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with('-'))
        .map(PathBuf::from)
        .unwrap_or_else(BankFile::default_path);

    let midi = match MidirOut::new() {
        Ok(midi) => Arc::new(midi),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let config = Config::load();
    let bank = BankFile::load(&bank_path);
    let mut sequencer = Sequencer::new(midi, bank, &config);

    println!(
        "ostinato — {} device(s), patterns at {}",
        sequencer.devices().len(),
        bank_path.display()
    );
    println!("type 'help' for commands");

    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if !handle_command(&sequencer, line.split_whitespace().collect()) {
            break;
        }
    }

    sequencer.close();
}

/// Dispatch one command line. Returns false when the session should end.
fn handle_command(seq: &Sequencer, parts: Vec<&str>) -> bool {
    match parts.as_slice() {
        [] => {}
        ["quit"] | ["q"] | ["exit"] => return false,
        ["help"] | ["h"] => print_help(),
        ["play"] | ["p"] => seq.toggle_play(),
        ["status"] => print_status(seq),
        ["tempo"] => println!("{:.1} bpm", seq.tempo()),
        ["tempo", value] => match value.parse::<f64>() {
            // A signed value nudges the running tempo: +1 / -1 for whole
            // steps, +0.1 / -0.1 for fine adjustment.
            Ok(delta) if value.starts_with('+') || value.starts_with('-') => {
                seq.set_tempo(seq.tempo() + delta)
            }
            Ok(tempo) => seq.set_tempo(tempo),
            Err(_) => println!("?"),
        },
        ["track", "add"] => seq.add_track(),
        ["track", "rm"] => seq.remove_track(),
        ["track", index] => with_index(index, |t| seq.toggle_track(t)),
        ["step", "add", track] => with_index(track, |t| seq.add_step(t)),
        ["step", "rm", track] => with_index(track, |t| seq.remove_step(t)),
        ["step", track, step] => {
            with_two(track, step, |t, s| seq.toggle_step(t, s));
        }
        ["copy", track, step] => with_two(track, step, |t, s| seq.copy_step(t, s)),
        ["paste", track, step] => with_two(track, step, |t, s| seq.paste_step(t, s)),
        ["note", track, note] => {
            with_two(track, note, |t, n| seq.set_track_chord(t, vec![n as u8]));
        }
        ["offset", track, step, offset] => {
            if let (Ok(t), Ok(s), Ok(o)) = (track.parse(), step.parse(), offset.parse()) {
                seq.set_step_offset(t, s, o);
            }
        }
        ["cc", "clear", track, control] => {
            if let (Ok(t), Ok(c)) = (track.parse::<usize>(), control.parse::<usize>()) {
                seq.clear_control(t, ostinato_core::control::CC_BASE + c);
            }
        }
        ["cc", track, control, value] => {
            if let (Ok(t), Ok(c), Ok(v)) = (track.parse::<usize>(), control.parse(), value.parse())
            {
                seq.set_control(t, ostinato_core::control::CC_BASE + c, v);
            }
        }
        ["load", pattern] => with_index(pattern, |p| seq.load(p)),
        ["save"] => seq.save(),
        ["chain", pattern] => with_index(pattern, |p| seq.chain(p)),
        ["now", pattern] => with_index(pattern, |p| seq.chain_now(p)),
        _ => println!("?"),
    }
    true
}

fn with_index(raw: &str, f: impl FnOnce(usize)) {
    if let Ok(index) = raw.parse() {
        f(index);
    } else {
        println!("?");
    }
}

fn with_two(a: &str, b: &str, f: impl FnOnce(usize, usize)) {
    if let (Ok(a), Ok(b)) = (a.parse(), b.parse()) {
        f(a, b);
    } else {
        println!("?");
    }
}

fn print_status(seq: &Sequencer) {
    println!(
        "{} | {:.1} bpm | pattern {}{}",
        if seq.is_playing() { "playing" } else { "stopped" },
        seq.tempo(),
        seq.active_pattern(),
        if seq.pending_chain().is_empty() {
            String::new()
        } else {
            format!(" | chain {:?}", seq.pending_chain())
        }
    );
    for track in 0..seq.track_count() {
        println!(
            "  track {}: {} steps, on step {}{}",
            track,
            seq.step_count(track),
            seq.current_step(track),
            if seq.track_is_active(track) {
                ""
            } else {
                " (muted)"
            }
        );
    }
}

fn print_help() {
    println!("  play                   toggle play/stop");
    println!("  status                 transport and track overview");
    println!("  tempo [bpm|+1|-0.1]    show, set or nudge the tempo");
    println!("  track add|rm           add or remove the last track");
    println!("  track <t>              mute/unmute track <t>");
    println!("  step add|rm <t>        grow or shrink track <t>");
    println!("  step <t> <s>           toggle step <s> on track <t>");
    println!("  note <t> <midi note>   set track <t> to a note (60 = {})", note_name(60));
    println!("  offset <t> <s> <0-5>   micro-timing offset for a step");
    println!("  cc <t> <cc> <value>    set a control change on track <t>");
    println!("  cc clear <t> <cc>      deactivate a control change");
    println!("  load <p> / save        switch or persist patterns");
    println!("  chain <p> / now <p>    queue or replace the pattern chain");
    println!("  quit");
}
