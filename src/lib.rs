//! Workspace-level tooling package (pre-commit hooks); intentionally empty.
