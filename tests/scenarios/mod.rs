mod demo_release;
mod escaped_errors;
mod stage_gating;
