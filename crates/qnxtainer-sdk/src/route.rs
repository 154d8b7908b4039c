use reqwest::Method;

/// The fixed set of server endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    State,
    UploadImage,
    CreateContainer,
    StartFromImage(&'a str),
    Start(&'a str),
    Stop(&'a str),
}

impl<'a> Route<'a> {
    pub fn method(&self) -> Method {
        match self {
            Route::State => Method::GET,
            _ => Method::POST,
        }
    }

    /// Path segments, unencoded. Ids are pushed as single segments.
    pub fn segments(&self) -> Vec<&'a str> {
        match *self {
            Route::State => vec!["state"],
            Route::UploadImage => vec!["upload-image"],
            Route::CreateContainer => vec!["create-container"],
            Route::StartFromImage(image_id) => vec!["start-from-image", image_id],
            Route::Start(container_id) => vec!["start", container_id],
            Route::Stop(container_id) => vec!["stop", container_id],
        }
    }

    /// Operation name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Route::State => "fetch state",
            Route::UploadImage => "upload image",
            Route::CreateContainer => "create container",
            Route::StartFromImage(_) => "start from image",
            Route::Start(_) => "start container",
            Route::Stop(_) => "stop container",
        }
    }
}
