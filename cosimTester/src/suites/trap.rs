use std::time::Duration;

use crate::error::TestError;
use crate::harness::TestContext;
use crate::interrupt::PulseTrain;
use crate::suite::TestRegistry;
use crate::types::RunOptions;
use crate::verify::{self, INTERRUPT_MARKER, InterruptedOutput};

pub const BASE_STRING: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
pub const HOST_PULSES: [u8; 5] = [0, 1, 2, 3, 4];
pub const PULSE_INTERVAL: Duration = Duration::from_millis(200);
pub const GUEST_INTERRUPTS: [u8; 5] = [5, 6, 7, 8, 9];

const OUTPUT_PREFIX: &str = ">>";
const MIN_INTERRUPTS: usize = 2;

/// Checks the `>>` line of a run interrupted while printing [`BASE_STRING`].
pub fn check_interrupted_output(output: &str) -> Result<(), TestError> {
    let line = verify::find_prefixed_line(output, OUTPUT_PREFIX).ok_or_else(|| {
        TestError::assertion_with_output("could not find output string", output)
    })?;
    InterruptedOutput {
        marker: INTERRUPT_MARKER,
        min_markers: MIN_INTERRUPTS,
        reference: BASE_STRING,
    }
    .check(line)
    .map_err(|err| err.with_output(output))
}

fn io_interrupt_test(ctx: &TestContext<'_>, _name: &str) -> Result<(), TestError> {
    let image = ctx.compile_test(&["io_interrupt.c", "trap_handler.s"])?;
    let result = ctx.run_verilator(&image, &RunOptions::default())?;
    check_interrupted_output(&result.output)
}

fn multicycle_test(ctx: &TestContext<'_>, _name: &str) -> Result<(), TestError> {
    let image = ctx.assemble_test(&["multicycle.s"])?;
    let result = ctx.run_verilator(&image, &RunOptions::default())?;
    verify::expect_contains(&result.output, "PASS")?;
    verify::expect_no_failure(&result.output)
}

fn unaligned_data_fault_test(ctx: &TestContext<'_>, _name: &str) -> Result<(), TestError> {
    let image = ctx.compile_test(&["unaligned_data_fault.c", "trap_handler.s"])?;
    let result = ctx.run_backend(ctx.backend_kind(), &image, &RunOptions::default())?;
    verify::check_result(&ctx.fixture("unaligned_data_fault.c"), &result.output)
}

fn illegal_instruction_test(ctx: &TestContext<'_>, _name: &str) -> Result<(), TestError> {
    let image = ctx.compile_test(&[
        "illegal_instruction.c",
        "trap_handler.s",
        "gen_illegal_inst_trap.S",
    ])?;
    let result = ctx.run_backend(ctx.backend_kind(), &image, &RunOptions::default())?;
    verify::check_result(&ctx.fixture("gen_illegal_inst_trap.S"), &result.output)
}

/// The guest's trap handler prints a marker per interrupt received from the
/// host over the emulator's input pipe; the fixture's `CHECK:` lines cover
/// the final register state.
fn recv_host_interrupt_test(ctx: &TestContext<'_>, _name: &str) -> Result<(), TestError> {
    let image = ctx.compile_test(&["recv_host_interrupt.c", "trap_handler.s"])?;
    let train = PulseTrain::new(HOST_PULSES, PULSE_INTERVAL);
    let result = ctx.run_with_host_interrupts(&image, &train)?;
    check_interrupted_output(&result.output)?;
    verify::check_result(&ctx.fixture("recv_host_interrupt.c"), &result.output)
        .map_err(|err| err.with_output(&result.output))
}

/// The guest raises one host interrupt per byte in [`GUEST_INTERRUPTS`].
fn send_host_interrupt_test(ctx: &TestContext<'_>, _name: &str) -> Result<(), TestError> {
    let image = ctx.compile_test(&["send_host_interrupt.c"])?;
    let (result, received) = ctx.run_with_guest_interrupts(&image, GUEST_INTERRUPTS.len())?;
    verify::expect_interrupt_bytes(&received, &GUEST_INTERRUPTS)
        .map_err(|err| err.with_output(&result.output))
}

pub fn register(registry: &mut TestRegistry) -> Result<(), TestError> {
    registry.register(io_interrupt_test, &["io_interrupt"])?;
    registry.register(multicycle_test, &["multicycle"])?;
    registry.register(recv_host_interrupt_test, &["recv_host_interrupt"])?;
    registry.register(send_host_interrupt_test, &["send_host_interrupt"])?;
    registry.register_generic("creg_non_supervisor")?;
    registry.register_generic("eret_non_supervisor")?;
    registry.register_generic("dinvalidate_non_supervisor")?;
    registry.register_generic("inst_align_fault")?;
    registry.register_generic("syscall")?;

    registry.register(
        unaligned_data_fault_test,
        &["unaligned_data_fault_emulator", "unaligned_data_fault_verilator"],
    )?;
    registry.register(
        illegal_instruction_test,
        &["illegal_instruction_emulator", "illegal_instruction_verilator"],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_line_is_found_among_boot_noise() {
        let output = "booting\n>>ABCDEFGHIJ*KLMNOPQRSTUVWXYZabcdefghijklmn*opqrstuvwxyz0123456789\nregister s2 = deadbeef\n";
        check_interrupted_output(output).expect("valid interrupted output");
    }

    #[test]
    fn missing_line_fails_with_output_attached() {
        let err = check_interrupted_output("no prefixed line").unwrap_err();
        assert_eq!(err.output(), Some("no prefixed line"));
    }

    #[test]
    fn trap_tests_are_registered() {
        let mut registry = TestRegistry::new();
        register(&mut registry).unwrap();
        for name in [
            "io_interrupt",
            "recv_host_interrupt",
            "send_host_interrupt",
            "syscall_emulator",
            "syscall_verilator",
            "unaligned_data_fault_emulator",
            "illegal_instruction_verilator",
        ] {
            assert!(registry.contains(name), "{name} missing");
        }
    }
}
