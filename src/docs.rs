use utoipa::OpenApi;
use crate::modules::video::dto::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::video::handler::upload_video,
        crate::modules::video::handler::stream_progress,
        crate::modules::video::handler::process_video,
        crate::modules::video::handler::download_video,
        crate::modules::video::handler::show_result,
    ),
    components(
        schemas(UploadResponse, ProcessResponse, ResultResponse)
    ),
    tags(
        (name = "Video", description = "Upload, background subtraction, caption and story")
    )
)]
pub struct ApiDoc;
