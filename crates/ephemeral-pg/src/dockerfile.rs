//! Dockerfile templating for the sandbox image.
//!
//! The image adds a user whose uid matches the host user, so the data
//! directory bind-mounted from the temp workspace can be chowned by the
//! entrypoint and deleted by the host afterwards.

/// Base image repository.
pub const ENGINE_IMAGE: &str = "postgres";

/// Prefix of the environment variables the base image reads at init.
pub const ENGINE_ENV_PREFIX: &str = "POSTGRES";

/// Port the server listens on inside the container.
pub const INTERNAL_PORT: u16 = 5432;

/// Data directory inside the container.
pub const DATA_PATH: &str = "/var/lib/postgresql/data";

pub const ENTRYPOINT: [&str; 2] = ["docker-entrypoint.sh", "postgres"];

/// Render the Dockerfile for one sandbox image.
pub fn render_dockerfile(
    engine_version: &str,
    uid: &str,
    database_user: &str,
    database_name: &str,
) -> String {
    let entrypoint = ENTRYPOINT
        .iter()
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "FROM {ENGINE_IMAGE}:{engine_version}\n\
         RUN useradd --uid {uid} --user-group {database_user}\n\
         ENV {ENGINE_ENV_PREFIX}_USER={database_user}\n\
         ENV {ENGINE_ENV_PREFIX}_DB={database_name}\n\
         USER {database_user}\n\
         EXPOSE {INTERNAL_PORT}\n\
         ENTRYPOINT [{entrypoint}]\n"
    )
}
